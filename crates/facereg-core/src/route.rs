//! Per-face routing: recognized identity, known key without a profile,
//! or a stranger to enroll.

use crate::collab::{BlobStore, ProfileStore, Recognition};
use crate::gallery::Gallery;
use crate::matcher::{MatchOutcome, Matcher};
use crate::types::{FaceProbe, IdentityKey};

#[derive(Debug, Clone)]
pub enum FaceEvent {
    Recognized(Recognition),
    /// Gallery matched but the profile record is gone or unreadable.
    /// The face is skipped, never re-enrolled.
    ProfileMissing { key: IdentityKey },
    Unknown(FaceProbe),
}

/// Match one probe and, on a hit, fetch what is needed to display it.
pub fn classify(
    matcher: &dyn Matcher,
    gallery: &Gallery,
    profiles: &dyn ProfileStore,
    blobs: &dyn BlobStore,
    probe: FaceProbe,
) -> FaceEvent {
    let (key, distance) = match matcher.identify(&probe.embedding, gallery) {
        MatchOutcome::Match { key, distance, .. } => (key, distance),
        MatchOutcome::NoMatch { nearest } => {
            tracing::debug!(?nearest, "no gallery match");
            return FaceEvent::Unknown(probe);
        }
    };

    let profile = match profiles.get(&key) {
        Ok(Some(p)) => p,
        Ok(None) => {
            tracing::warn!(key = %key, "profile record not found");
            return FaceEvent::ProfileMissing { key };
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "profile fetch failed");
            return FaceEvent::ProfileMissing { key };
        }
    };

    let image = match blobs.get(&key) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "enrollment image fetch failed");
            None
        }
    };

    FaceEvent::Recognized(Recognition {
        key,
        profile,
        image,
        region: probe.region,
        distance,
    })
}
