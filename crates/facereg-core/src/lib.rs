//! facereg-core — Face identity matching and on-the-fly enrollment.
//!
//! Holds the gallery of enrolled embeddings, decides whether a probe
//! embedding belongs to a known identity, and commits new identities.
//! Capture, the embedding model, storage backends, voice and the profile
//! dialog are reached through the traits in [`collab`].

pub mod collab;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod memory;
pub mod route;
pub mod types;

use std::path::PathBuf;

pub use collab::{
    BlobStore, CancelFlag, CaptureError, DialogOutcome, Display, EmbeddingProvider, FrameSource,
    ProfileDialog, ProfileStore, ProviderError, Recognition, StoreError, Voice,
};
pub use enroll::{EnrollError, EnrollOutcome, Enrolled, EnrollmentCoordinator, PendingEnrollment};
pub use gallery::{FileGalleryStore, Gallery, GalleryEntry, GalleryError, GalleryStore};
pub use matcher::{DistanceMetric, MatchOutcome, Matcher, ThresholdMatcher};
pub use route::{classify, FaceEvent};
pub use types::{Embedding, FaceProbe, FaceRegion, Frame, IdentityKey, ProfileRecord};

/// File name of the gallery inside the data directory.
pub const GALLERY_FILE: &str = "gallery.json";
/// File name of the profile/image database inside the data directory.
pub const STORE_FILE: &str = "profiles.db";

/// `$XDG_DATA_HOME/facereg`, falling back to `~/.local/share/facereg`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facereg")
}
