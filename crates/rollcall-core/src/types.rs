use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Face region in pixel coordinates, stored as (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Map a region found in a downsampled frame back to full-frame coordinates.
    pub fn upscale(&self, factor: u32) -> Region {
        Region {
            top: self.top.saturating_mul(factor),
            right: self.right.saturating_mul(factor),
            bottom: self.bottom.saturating_mul(factor),
            left: self.left.saturating_mul(factor),
        }
    }
}

/// Face encoding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two encodings.
    ///
    /// Encodings of different length live in different spaces and are
    /// infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame. Lives for a single processing cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Region in the coordinates of the image handed to the recognizer.
    pub region: Region,
    pub encoding: Embedding,
    pub confidence: f32,
}

/// A known person: name, reference encoding and the backing image on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub encoding: Embedding,
    pub image_path: PathBuf,
}

/// Outcome of matching one detection against the registry.
#[derive(Debug, Clone)]
pub struct MatchResult<'r> {
    pub detection: Detection,
    /// The accepted identity, `None` when unknown.
    pub identity: Option<&'r Identity>,
    /// Distance to the nearest registry entry (infinite for an empty registry).
    pub distance: f32,
}

impl MatchResult<'_> {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.map(|i| i.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_region_upscale() {
        let r = Region { top: 10, right: 40, bottom: 30, left: 20 };
        let up = r.upscale(4);
        assert_eq!(up, Region { top: 40, right: 160, bottom: 120, left: 80 });
        assert_eq!(up.width(), 80);
        assert_eq!(up.height(), 80);
    }

    #[test]
    fn test_region_degenerate_size() {
        let r = Region { top: 30, right: 10, bottom: 20, left: 40 };
        assert_eq!(r.width(), 0);
        assert_eq!(r.height(), 0);
    }
}
