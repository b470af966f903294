//! The enrollment gallery and its on-disk persistence.
//!
//! The gallery is one ordered, append-only list of (identity key, embedding)
//! entries. It is rewritten in full after every enrollment.

use crate::types::{Embedding, IdentityKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity_key: IdentityKey,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// Ordered collection of enrolled identities.
///
/// Index `i` always names the `i`-th enrollment; entries are never removed
/// or reordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&GalleryEntry> {
        self.entries.get(index)
    }

    pub fn find(&self, key: &IdentityKey) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| &e.identity_key == key)
    }

    /// Append a new enrollment. Only the enrollment coordinator grows the gallery.
    pub(crate) fn append(&mut self, identity_key: IdentityKey, embedding: Embedding) -> usize {
        self.entries.push(GalleryEntry {
            identity_key,
            embedding,
            enrolled_at: Utc::now(),
        });
        self.entries.len() - 1
    }
}

/// Durable home of the gallery.
pub trait GalleryStore {
    /// Load the persisted gallery. Never fails: anything unreadable is an
    /// empty gallery.
    fn load(&self) -> Gallery;

    /// Overwrite the persisted gallery with `gallery`.
    fn save(&self, gallery: &Gallery) -> Result<(), GalleryError>;
}

#[derive(Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    entries: Vec<GalleryEntry>,
}

/// JSON file gallery store.
pub struct FileGalleryStore {
    path: PathBuf,
}

impl FileGalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "gallery".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> GalleryError {
        GalleryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl GalleryStore for FileGalleryStore {
    fn load(&self) -> Gallery {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery on disk; starting empty");
                return Gallery::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "gallery unreadable; starting empty");
                return Gallery::new();
            }
        };

        if bytes.is_empty() {
            tracing::warn!(path = %self.path.display(), "gallery file is empty; starting empty");
            return Gallery::new();
        }

        match serde_json::from_slice::<GalleryFile>(&bytes) {
            Ok(file) if file.version == GALLERY_FORMAT_VERSION => {
                tracing::info!(
                    path = %self.path.display(),
                    entries = file.entries.len(),
                    "gallery loaded"
                );
                Gallery::from_entries(file.entries)
            }
            Ok(file) => {
                tracing::warn!(
                    path = %self.path.display(),
                    version = file.version,
                    expected = GALLERY_FORMAT_VERSION,
                    "unknown gallery format version; starting empty"
                );
                Gallery::new()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "gallery corrupt; starting empty");
                Gallery::new()
            }
        }
    }

    fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }

        let doc = GalleryFile {
            version: GALLERY_FORMAT_VERSION,
            entries: gallery.entries.clone(),
        };
        let bytes = serde_json::to_vec(&doc)?;

        // Write beside the target, then rename over it.
        let tmp = self.tmp_path();
        let mut file = std::fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&bytes).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        tracing::debug!(path = %self.path.display(), entries = gallery.len(), "gallery saved");
        Ok(())
    }
}
