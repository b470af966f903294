//! On-the-fly enrollment of unrecognized faces.
//!
//! Remote writes (profile record, then image) always happen before the
//! gallery grows, so a gallery entry never points at a missing profile.
//! The reverse is not true: a failure after the profile write leaves an
//! orphaned profile that nothing references. That is accepted and only
//! logged.

use crate::collab::{BlobStore, CancelFlag, DialogOutcome, ProfileDialog, ProfileStore, StoreError, Voice};
use crate::gallery::{Gallery, GalleryStore};
use crate::types::{Embedding, IdentityKey, ProfileRecord};
use thiserror::Error;

pub const DEFAULT_CONFIRMATION: &str = "Registration successful. Welcome to the system.";

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("profile write for {key} failed: {source}")]
    ProfileWrite {
        key: IdentityKey,
        #[source]
        source: StoreError,
    },
    #[error("image upload for {key} failed (profile left orphaned): {source}")]
    ImageUpload {
        key: IdentityKey,
        #[source]
        source: StoreError,
    },
}

/// An enrollment whose key is minted but whose profile is not yet collected.
#[derive(Debug, Clone)]
pub struct PendingEnrollment {
    pub key: IdentityKey,
    pub probe: Embedding,
    /// Still of the frame the face was seen in.
    pub still: Vec<u8>,
}

/// A committed enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrolled {
    pub key: IdentityKey,
    /// Gallery index of the new entry.
    pub index: usize,
    /// Whether the grown gallery reached durable storage.
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled(Enrolled),
    Cancelled,
}

/// Drives profile collection and commits new identities.
pub struct EnrollmentCoordinator<'a> {
    profiles: &'a dyn ProfileStore,
    blobs: &'a dyn BlobStore,
    voice: &'a dyn Voice,
    gallery_store: &'a dyn GalleryStore,
    confirmation: &'a str,
}

impl<'a> EnrollmentCoordinator<'a> {
    pub fn new(
        profiles: &'a dyn ProfileStore,
        blobs: &'a dyn BlobStore,
        voice: &'a dyn Voice,
        gallery_store: &'a dyn GalleryStore,
    ) -> Self {
        Self {
            profiles,
            blobs,
            voice,
            gallery_store,
            confirmation: DEFAULT_CONFIRMATION,
        }
    }

    /// Override the phrase spoken after a successful enrollment.
    pub fn with_confirmation(mut self, phrase: &'a str) -> Self {
        self.confirmation = phrase;
        self
    }

    /// Mint a key for an unrecognized face.
    pub fn begin(&self, probe: Embedding, still: Vec<u8>) -> PendingEnrollment {
        let key = IdentityKey::mint();
        tracing::debug!(key = %key, "enrollment started");
        PendingEnrollment { key, probe, still }
    }

    /// Persist a completed profile and grow the gallery.
    pub fn commit(
        &self,
        gallery: &mut Gallery,
        pending: PendingEnrollment,
        profile: &ProfileRecord,
    ) -> Result<Enrolled, EnrollError> {
        let PendingEnrollment { key, probe, still } = pending;

        self.profiles
            .put(&key, profile)
            .map_err(|source| EnrollError::ProfileWrite {
                key: key.clone(),
                source,
            })?;

        if let Err(source) = self.blobs.put(&key, &still) {
            tracing::warn!(key = %key, error = %source, "image upload failed; profile orphaned");
            return Err(EnrollError::ImageUpload { key, source });
        }

        self.voice.speak(self.confirmation);

        let index = gallery.append(key.clone(), probe);
        let persisted = match self.gallery_store.save(gallery) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "gallery save failed; identity kept in memory for this session only"
                );
                false
            }
        };

        tracing::info!(key = %key, name = %profile.name, index, persisted, "enrolled new identity");
        Ok(Enrolled { key, index, persisted })
    }

    /// Blocking enrollment: mint, ask, commit.
    pub fn enroll(
        &self,
        gallery: &mut Gallery,
        probe: Embedding,
        still: Vec<u8>,
        dialog: &dyn ProfileDialog,
    ) -> Result<EnrollOutcome, EnrollError> {
        let pending = self.begin(probe, still);
        match dialog.collect_profile(&CancelFlag::new()) {
            DialogOutcome::Completed(profile) => {
                self.commit(gallery, pending, &profile).map(EnrollOutcome::Enrolled)
            }
            DialogOutcome::Cancelled => {
                tracing::debug!(key = %pending.key, "enrollment cancelled at dialog");
                Ok(EnrollOutcome::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::{FileGalleryStore, GalleryError};
    use crate::matcher::{Matcher, ThresholdMatcher};
    use crate::memory::{MemoryBlobStore, MemoryProfileStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingVoice(Mutex<Vec<String>>);

    impl Voice for RecordingVoice {
        fn speak(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    impl RecordingVoice {
        fn spoken(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FixedDialog(DialogOutcome);

    impl ProfileDialog for FixedDialog {
        fn collect_profile(&self, _cancel: &CancelFlag) -> DialogOutcome {
            self.0.clone()
        }
    }

    /// Gallery store that keeps the last saved gallery in memory.
    #[derive(Default)]
    struct MemoryGalleryStore {
        saved: Mutex<Option<Gallery>>,
        fail: bool,
    }

    impl GalleryStore for MemoryGalleryStore {
        fn load(&self) -> Gallery {
            self.saved.lock().unwrap().clone().unwrap_or_default()
        }

        fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
            if self.fail {
                return Err(GalleryError::Io {
                    path: "mem".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            *self.saved.lock().unwrap() = Some(gallery.clone());
            Ok(())
        }
    }

    fn ana() -> ProfileRecord {
        ProfileRecord {
            name: "Ana".into(),
            domain: "Eng".into(),
            age: "30".into(),
            year: "2024".into(),
        }
    }

    struct Fixture {
        profiles: MemoryProfileStore,
        blobs: MemoryBlobStore,
        voice: RecordingVoice,
        store: MemoryGalleryStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                profiles: MemoryProfileStore::new(),
                blobs: MemoryBlobStore::new(),
                voice: RecordingVoice::default(),
                store: MemoryGalleryStore::default(),
            }
        }

        fn coordinator(&self) -> EnrollmentCoordinator<'_> {
            EnrollmentCoordinator::new(&self.profiles, &self.blobs, &self.voice, &self.store)
        }
    }

    #[test]
    fn test_enroll_then_recognize() {
        let fx = Fixture::new();
        let mut gallery = Gallery::new();
        let matcher = ThresholdMatcher::default();
        let e1 = Embedding::new(vec![0.1, 0.2, 0.3]);

        assert!(!matcher.identify(&e1, &gallery).is_match());

        let outcome = fx
            .coordinator()
            .enroll(&mut gallery, e1.clone(), b"jpeg".to_vec(), &FixedDialog(DialogOutcome::Completed(ana())))
            .unwrap();
        let EnrollOutcome::Enrolled(enrolled) = outcome else {
            panic!("expected enrollment");
        };

        assert_eq!(gallery.len(), 1);
        assert_eq!(enrolled.index, 0);
        assert!(enrolled.persisted);
        assert_eq!(fx.profiles.get(&enrolled.key).unwrap(), Some(ana()));
        assert_eq!(fx.blobs.get(&enrolled.key).unwrap().as_deref(), Some(&b"jpeg"[..]));
        assert_eq!(fx.voice.spoken(), vec![DEFAULT_CONFIRMATION.to_string()]);
        assert_eq!(fx.store.load(), gallery);

        let e1_again = Embedding::new(vec![0.11, 0.19, 0.3]);
        assert_eq!(matcher.identify(&e1_again, &gallery).key(), Some(&enrolled.key));
    }

    #[test]
    fn test_cancelled_dialog_changes_nothing() {
        let fx = Fixture::new();
        let mut gallery = Gallery::new();

        let outcome = fx
            .coordinator()
            .enroll(&mut gallery, Embedding::new(vec![1.0]), b"jpeg".to_vec(), &FixedDialog(DialogOutcome::Cancelled))
            .unwrap();

        assert_eq!(outcome, EnrollOutcome::Cancelled);
        assert!(gallery.is_empty());
        assert!(fx.profiles.is_empty());
        assert!(fx.blobs.is_empty());
        assert!(fx.voice.spoken().is_empty());
        assert!(fx.store.saved.lock().unwrap().is_none());
    }

    #[test]
    fn test_profile_write_failure_leaves_gallery_alone() {
        let fx = Fixture::new();
        fx.profiles.set_fail_writes(true);
        let mut gallery = Gallery::new();

        let err = fx
            .coordinator()
            .enroll(&mut gallery, Embedding::new(vec![1.0]), b"jpeg".to_vec(), &FixedDialog(DialogOutcome::Completed(ana())))
            .unwrap_err();

        assert!(matches!(err, EnrollError::ProfileWrite { .. }));
        assert!(gallery.is_empty());
        assert!(fx.blobs.is_empty());
        assert!(fx.voice.spoken().is_empty());
    }

    #[test]
    fn test_image_failure_orphans_profile() {
        let fx = Fixture::new();
        fx.blobs.set_fail_writes(true);
        let mut gallery = Gallery::new();
        let coordinator = fx.coordinator();
        let pending = coordinator.begin(Embedding::new(vec![1.0]), b"jpeg".to_vec());
        let key = pending.key.clone();

        let err = coordinator.commit(&mut gallery, pending, &ana()).unwrap_err();

        assert!(matches!(err, EnrollError::ImageUpload { .. }));
        assert!(gallery.is_empty());
        assert_eq!(fx.profiles.get(&key).unwrap(), Some(ana()));
        assert!(fx.voice.spoken().is_empty());
    }

    #[test]
    fn test_gallery_save_failure_keeps_entry_in_memory() {
        let mut fx = Fixture::new();
        fx.store.fail = true;
        let mut gallery = Gallery::new();

        let outcome = fx
            .coordinator()
            .enroll(&mut gallery, Embedding::new(vec![1.0]), b"jpeg".to_vec(), &FixedDialog(DialogOutcome::Completed(ana())))
            .unwrap();

        let EnrollOutcome::Enrolled(enrolled) = outcome else {
            panic!("expected enrollment");
        };
        assert!(!enrolled.persisted);
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_each_enrollment_grows_gallery_by_one() {
        let fx = Fixture::new();
        let mut gallery = Gallery::new();
        let dialog = FixedDialog(DialogOutcome::Completed(ana()));
        let mut keys = Vec::new();

        for i in 0..5 {
            let before = gallery.len();
            let outcome = fx
                .coordinator()
                .enroll(&mut gallery, Embedding::new(vec![i as f32 * 10.0]), vec![i], &dialog)
                .unwrap();
            assert_eq!(gallery.len(), before + 1);
            if let EnrollOutcome::Enrolled(e) = outcome {
                keys.push(e.key);
            }
        }

        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_custom_confirmation_phrase() {
        let fx = Fixture::new();
        let mut gallery = Gallery::new();
        fx.coordinator()
            .with_confirmation("hello")
            .enroll(&mut gallery, Embedding::new(vec![1.0]), vec![], &FixedDialog(DialogOutcome::Completed(ana())))
            .unwrap();
        assert_eq!(fx.voice.spoken(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_enrollment_persists_to_file_store() {
        let dir = std::env::temp_dir().join(format!("facereg-enroll-{}", uuid::Uuid::new_v4()));
        let store = FileGalleryStore::new(dir.join("gallery.json"));
        let profiles = MemoryProfileStore::new();
        let blobs = MemoryBlobStore::new();
        let voice = RecordingVoice::default();
        let mut gallery = store.load();

        EnrollmentCoordinator::new(&profiles, &blobs, &voice, &store)
            .enroll(&mut gallery, Embedding::new(vec![0.5, 0.5]), vec![1, 2], &FixedDialog(DialogOutcome::Completed(ana())))
            .unwrap();

        assert_eq!(store.load(), gallery);
        std::fs::remove_dir_all(dir).ok();
    }
}
