//! Nearest-neighbour identity matching.

use crate::types::{Detection, Identity, MatchResult};

/// Reference acceptance threshold for Euclidean distance between encodings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a detection against the registry gallery.
pub trait Matcher {
    fn compare<'r>(&self, detection: Detection, gallery: &'r [Identity]) -> MatchResult<'r>;
}

/// Euclidean nearest-neighbour matcher.
///
/// A detection is accepted when the nearest gallery entry is strictly closer
/// than `threshold`. Ties on the minimum distance resolve to the entry that
/// comes first in gallery order.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare<'r>(&self, detection: Detection, gallery: &'r [Identity]) -> MatchResult<'r> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let dist = detection.encoding.euclidean_distance(&identity.encoding);
            // Strict `<` keeps the first occurrence on ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let identity = match best_idx {
            Some(idx) if best_dist < self.threshold => Some(&gallery[idx]),
            _ => None,
        };

        MatchResult {
            detection,
            identity,
            distance: best_dist,
        }
    }
}
