//! Interfaces to everything outside the matching and enrollment engine:
//! capture, the embedding model, remote stores, voice, the profile dialog
//! and display.

use crate::types::{FaceProbe, Frame, IdentityKey, ProfileRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("stored record for {key} is malformed: {reason}")]
    Malformed { key: IdentityKey, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

/// Source of captured frames.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Face detection + embedding model.
pub trait EmbeddingProvider {
    /// Every face found in `frame`. May be empty.
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<FaceProbe>, ProviderError>;
}

/// Profile records keyed by identity.
pub trait ProfileStore {
    fn get(&self, key: &IdentityKey) -> Result<Option<ProfileRecord>, StoreError>;
    fn put(&self, key: &IdentityKey, record: &ProfileRecord) -> Result<(), StoreError>;
}

/// Enrollment images keyed by identity.
pub trait BlobStore {
    fn put(&self, key: &IdentityKey, bytes: &[u8]) -> Result<(), StoreError>;
    fn get(&self, key: &IdentityKey) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Spoken feedback. Fire-and-forget.
pub trait Voice {
    fn speak(&self, text: &str);
}

/// Outcome of asking a person for their profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    Completed(ProfileRecord),
    Cancelled,
}

/// Collects name, domain, age and year, in that order.
///
/// Runs off the session thread. Implementations should return
/// [`DialogOutcome::Cancelled`] as soon as they observe `cancel`.
pub trait ProfileDialog: Send + Sync {
    fn collect_profile(&self, cancel: &CancelFlag) -> DialogOutcome;
}

/// Shared, clonable cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A face recognized in the current frame, ready to be shown.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub key: IdentityKey,
    pub profile: ProfileRecord,
    /// Enrollment image, if it could be fetched.
    pub image: Option<Vec<u8>>,
    pub region: crate::types::FaceRegion,
    pub distance: f32,
}

/// Frame presentation.
pub trait Display {
    fn show(&mut self, frame: &Frame, recognized: &[Recognition]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
