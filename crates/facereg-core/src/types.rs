use serde::{Deserialize, Serialize};
use std::fmt;

/// Face embedding vector (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero vector on either side yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Opaque, globally unique identifier for one enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Mint a fresh random (v4) key. Never reuse one.
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IdentityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IdentityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Face location in frame pixels, in (top, right, bottom, left) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One detected face: its embedding and where it sits in the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceProbe {
    pub embedding: Embedding,
    pub region: FaceRegion,
}

/// A captured frame with its still image, encoded for upload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded still of the whole frame.
    pub still: Vec<u8>,
}

/// Profile fields collected at enrollment.
///
/// Field names on the wire (`name`, `Domain`, `Age`, `year`) match the
/// records already written by earlier deployments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Age")]
    pub age: String,
    pub year: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_minted_keys_are_unique() {
        let keys: std::collections::HashSet<_> = (0..1000).map(|_| IdentityKey::mint()).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_profile_record_wire_names() {
        let record = ProfileRecord {
            name: "Ana".into(),
            domain: "Eng".into(),
            age: "30".into(),
            year: "2024".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Ana");
        assert_eq!(json["Domain"], "Eng");
        assert_eq!(json["Age"], "30");
        assert_eq!(json["year"], "2024");
    }

    #[test]
    fn test_region_size() {
        let r = FaceRegion { top: 10, right: 60, bottom: 80, left: 20 };
        assert_eq!(r.width(), 40);
        assert_eq!(r.height(), 70);
    }
}
