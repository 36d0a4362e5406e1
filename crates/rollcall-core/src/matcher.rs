//! Nearest-neighbor matching over the enrolled population.

use crate::types::{Identity, Template};

/// Canonical acceptance threshold on Euclidean distance.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// A winning candidate and its distance to the probe.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchHit<'a> {
    pub identity: &'a Identity,
    pub distance: f32,
}

/// Strategy for matching a probe template against enrolled candidates.
///
/// Implementations must be deterministic for a fixed probe and candidate
/// sequence, and must resolve exact distance ties to the first candidate in
/// iteration order. Callers pass candidates in ascending `identity_id`
/// order (the store snapshot order) so ties are reproducible.
pub trait Matcher: Send + Sync {
    fn best_match<'a>(
        &self,
        probe: &Template,
        candidates: &'a [Identity],
        threshold: f32,
    ) -> Option<MatchHit<'a>>;
}

/// Euclidean (L2) matcher over a full candidate scan.
///
/// O(n) in the number of candidates per probe. Always scans every entry,
/// with no early exit on the first sub-threshold distance, so the *closest*
/// enrolled identity wins, not merely the first sufficiently close one.
/// The threshold is applied once, after the scan. A distance exactly equal
/// to the threshold is a match.
pub struct L2Matcher;

impl Matcher for L2Matcher {
    fn best_match<'a>(
        &self,
        probe: &Template,
        candidates: &'a [Identity],
        threshold: f32,
    ) -> Option<MatchHit<'a>> {
        let mut best: Option<MatchHit<'a>> = None;

        for candidate in candidates {
            if !candidate.active {
                continue;
            }
            let Some(template) = candidate.current_template.as_ref() else {
                continue;
            };
            // Mismatched or zero-length vectors are non-comparable, not errors.
            if !probe.comparable_with(template) {
                continue;
            }
            let distance = probe.euclidean_distance(template);
            if !distance.is_finite() {
                continue;
            }
            // Strict improvement only: an exact tie keeps the first candidate seen.
            let improved = match &best {
                None => true,
                Some(hit) => distance < hit.distance,
            };
            if improved {
                best = Some(MatchHit {
                    identity: candidate,
                    distance,
                });
            }
        }

        best.filter(|hit| hit.distance <= threshold)
    }
}
