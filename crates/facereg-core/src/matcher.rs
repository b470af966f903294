//! Distance-based identity matching against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, IdentityKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default Euclidean tolerance for 128-d face encodings.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// How two embeddings are compared. Lower distance = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// L2 distance.
    #[default]
    Euclidean,
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    /// Distance between two embeddings.
    ///
    /// Embeddings of different dimension are infinitely far apart.
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        if a.dim() != b.dim() {
            return f32::INFINITY;
        }
        let d = match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => 1.0 - a.similarity(b),
        };
        if d.is_nan() { f32::INFINITY } else { d }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other} (expected euclidean or cosine)")),
        }
    }
}

/// Result of matching one probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match {
        key: IdentityKey,
        /// Gallery index of the matched entry.
        index: usize,
        distance: f32,
    },
    NoMatch {
        /// Distance to the nearest entry, if the gallery was non-empty.
        nearest: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }

    pub fn key(&self) -> Option<&IdentityKey> {
        match self {
            MatchOutcome::Match { key, .. } => Some(key),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

/// Strategy for deciding which enrolled identity, if any, a probe belongs to.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> MatchOutcome;

    /// Whether two embeddings would be considered the same person.
    fn same_face(&self, a: &Embedding, b: &Embedding) -> bool;
}

/// Nearest-neighbour matcher with a fixed acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdMatcher {
    pub metric: DistanceMetric,
    /// Inclusive upper bound on distance for a match.
    pub threshold: f32,
}

impl Default for ThresholdMatcher {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ThresholdMatcher {
    pub fn new(metric: DistanceMetric, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    /// Distance from `probe` to every gallery entry, in gallery order.
    pub fn distances(&self, probe: &Embedding, gallery: &Gallery) -> Vec<f32> {
        gallery
            .entries()
            .iter()
            .map(|e| self.metric.distance(probe, &e.embedding))
            .collect()
    }
}

impl Matcher for ThresholdMatcher {
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> MatchOutcome {
        if gallery.is_empty() {
            return MatchOutcome::NoMatch { nearest: None };
        }

        let distances = self.distances(probe, gallery);
        let is_match: Vec<bool> = distances.iter().map(|&d| d <= self.threshold).collect();

        // Stable argmin: strict `<` keeps the first-inserted entry on ties.
        let mut best = 0usize;
        for (i, &d) in distances.iter().enumerate().skip(1) {
            if d < distances[best] {
                best = i;
            }
        }

        let distance = distances[best];
        if is_match[best] {
            MatchOutcome::Match {
                key: gallery.entries()[best].identity_key.clone(),
                index: best,
                distance,
            }
        } else {
            MatchOutcome::NoMatch {
                nearest: distance.is_finite().then_some(distance),
            }
        }
    }

    fn same_face(&self, a: &Embedding, b: &Embedding) -> bool {
        self.metric.distance(a, b) <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use chrono::Utc;

    fn gallery(embeddings: &[(&str, Vec<f32>)]) -> Gallery {
        Gallery::from_entries(
            embeddings
                .iter()
                .map(|(k, v)| GalleryEntry {
                    identity_key: (*k).into(),
                    embedding: Embedding::new(v.clone()),
                    enrolled_at: Utc::now(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let outcome = ThresholdMatcher::default().identify(&probe, &Gallery::new());
        assert_eq!(outcome, MatchOutcome::NoMatch { nearest: None });
    }

    #[test]
    fn test_match_scans_whole_gallery() {
        // Best match is the last entry.
        let g = gallery(&[
            ("decoy1", vec![0.0, 1.0, 0.0]),
            ("decoy2", vec![0.0, 0.0, 1.0]),
            ("match", vec![1.0, 0.0, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.9, 0.1, 0.0]);
        let outcome = ThresholdMatcher::default().identify(&probe, &g);
        assert!(outcome.is_match());
        assert_eq!(outcome.key().map(|k| k.as_str()), Some("match"));
    }

    #[test]
    fn test_nearest_outside_threshold_is_no_match() {
        let g = gallery(&[("far", vec![5.0, 5.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        match ThresholdMatcher::default().identify(&probe, &g) {
            MatchOutcome::NoMatch { nearest: Some(d) } => assert!((d - 50f32.sqrt()).abs() < 1e-5),
            other => panic!("expected NoMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let g = gallery(&[("edge", vec![0.5, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let m = ThresholdMatcher::new(DistanceMetric::Euclidean, 0.5);
        assert!(m.identify(&probe, &g).is_match());
    }

    #[test]
    fn test_tie_goes_to_first_enrolled() {
        let g = gallery(&[("K1", vec![0.1, 0.0]), ("K2", vec![-0.1, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        match ThresholdMatcher::default().identify(&probe, &g) {
            MatchOutcome::Match { key, index, .. } => {
                assert_eq!(key.as_str(), "K1");
                assert_eq!(index, 0);
            }
            other => panic!("expected Match, got {other:?}"),
        }
    }

    #[test]
    fn test_tie_with_identical_embeddings() {
        let g = gallery(&[
            ("A", vec![3.0, 3.0]),
            ("K1", vec![0.2, 0.2]),
            ("K2", vec![0.2, 0.2]),
        ]);
        let probe = Embedding::new(vec![0.2, 0.25]);
        assert_eq!(
            ThresholdMatcher::default().identify(&probe, &g).key().map(|k| k.as_str()),
            Some("K1")
        );
    }

    #[test]
    fn test_identify_is_deterministic() {
        let g = gallery(&[("a", vec![0.3, 0.1]), ("b", vec![0.1, 0.3]), ("c", vec![0.2, 0.2])]);
        let probe = Embedding::new(vec![0.21, 0.19]);
        let m = ThresholdMatcher::default();
        let first = m.identify(&probe, &g);
        for _ in 0..50 {
            assert_eq!(m.identify(&probe, &g), first);
        }
    }

    #[test]
    fn test_dimension_mismatch_never_matches() {
        let g = gallery(&[("short", vec![0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(
            ThresholdMatcher::default().identify(&probe, &g),
            MatchOutcome::NoMatch { nearest: None }
        );
    }

    #[test]
    fn test_mismatched_entry_skipped_for_argmin() {
        let g = gallery(&[("bad", vec![0.0]), ("good", vec![0.1, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(
            ThresholdMatcher::default().identify(&probe, &g).key().map(|k| k.as_str()),
            Some("good")
        );
    }

    #[test]
    fn test_nan_distance_is_ignored() {
        let g = gallery(&[("nan", vec![f32::NAN, 0.0]), ("ok", vec![0.1, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(
            ThresholdMatcher::default().identify(&probe, &g).key().map(|k| k.as_str()),
            Some("ok")
        );
    }

    #[test]
    fn test_cosine_metric() {
        let g = gallery(&[("x", vec![1.0, 0.0]), ("y", vec![0.0, 1.0])]);
        let probe = Embedding::new(vec![0.0, 10.0]);
        let m = ThresholdMatcher::new(DistanceMetric::Cosine, 0.1);
        assert_eq!(m.identify(&probe, &g).key().map(|k| k.as_str()), Some("y"));
    }

    #[test]
    fn test_same_face() {
        let m = ThresholdMatcher::default();
        let a = Embedding::new(vec![0.0, 0.0]);
        assert!(m.same_face(&a, &Embedding::new(vec![0.3, 0.3])));
        assert!(!m.same_face(&a, &Embedding::new(vec![1.0, 1.0])));
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("Cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!("l2".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
