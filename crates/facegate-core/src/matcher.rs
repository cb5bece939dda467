use crate::index::GalleryIndex;
use crate::types::{Embedding, MatchResult};

/// Default acceptance distance for L2-normalised face embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for turning one query embedding into an identity decision.
pub trait Matcher {
    fn resolve(&self, query: &Embedding, index: &GalleryIndex) -> MatchResult;
}

/// Nearest-sample Euclidean matcher.
///
/// The single closest sample in the whole gallery decides: its identity is
/// returned if its distance is within `tolerance`, otherwise the query is
/// unknown. Exact ties go to the earlier sample in index order. There is no
/// voting across an identity's samples and no margin check against the
/// runner-up.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Matcher for EuclideanMatcher {
    fn resolve(&self, query: &Embedding, index: &GalleryIndex) -> MatchResult {
        if let Some(dim) = index.dim() {
            if query.dim() != dim {
                tracing::warn!(query = query.dim(), gallery = dim, "query dimension mismatch");
                return MatchResult::unknown(None);
            }
        }

        let mut best: Option<(f32, usize)> = None;
        for (i, (sample, _)) in index.samples().enumerate() {
            let d = query.euclidean_distance(sample);
            // NaN never compares less, so it can never become the best.
            if best.map_or(!d.is_nan(), |(best_d, _)| d < best_d) {
                best = Some((d, i));
            }
        }

        match best {
            Some((d, i)) if d <= self.tolerance => MatchResult {
                identity: index.identity_at(i).cloned(),
                distance: Some(d),
            },
            Some((d, _)) => MatchResult::unknown(Some(d)),
            None => MatchResult::unknown(None),
        }
    }
}
