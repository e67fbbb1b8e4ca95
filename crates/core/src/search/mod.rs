//! Query-side types and helpers: search hits, label listing filters, query
//! preparation and rayon-backed batch execution.

use crate::hnsw::distance::{normalize_in_place, Space};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One k-NN result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Caller-assigned label of the matched vector.
    pub label: u64,
    /// Distance in the index's space (lower = closer).
    pub distance: f32,
}

/// Which labels [`crate::VectorIndex::list_labels`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFilter {
    #[default]
    All,
    ActiveOnly,
    DeletedOnly,
}

impl LabelFilter {
    #[inline]
    pub fn admits(self, deleted: bool) -> bool {
        match self {
            LabelFilter::All => true,
            LabelFilter::ActiveOnly => !deleted,
            LabelFilter::DeletedOnly => deleted,
        }
    }
}

/// Normalize `vector` when the space or the index asks for unit vectors.
/// Borrowed input is returned untouched otherwise.
pub fn prepare_vector(space: Space, normalize: bool, vector: &[f32]) -> Cow<'_, [f32]> {
    if space.requires_normalization() || normalize {
        let mut owned = vector.to_vec();
        normalize_in_place(&mut owned);
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(vector)
    }
}

/// Map `f` over `items` on rayon workers, keeping input order.
/// Runs inside `pool` when one is given, otherwise on the global pool.
pub fn run_batch<T, R, F>(pool: Option<&ThreadPool>, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    let job = || -> Vec<R> { items.par_iter().map(&f).collect() };
    match pool {
        Some(pool) => pool.install(job),
        None => job(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_filter() {
        assert!(LabelFilter::All.admits(true));
        assert!(LabelFilter::All.admits(false));
        assert!(LabelFilter::ActiveOnly.admits(false));
        assert!(!LabelFilter::ActiveOnly.admits(true));
        assert!(LabelFilter::DeletedOnly.admits(true));
        assert!(!LabelFilter::DeletedOnly.admits(false));
    }

    #[test]
    fn test_prepare_vector_normalizes_cosine_only() {
        let v = [3.0f32, 4.0];
        assert!(matches!(prepare_vector(Space::L2, false, &v), Cow::Borrowed(_)));
        let n = prepare_vector(Space::Cosine, false, &v);
        assert!((n[0] - 0.6).abs() < 1e-6 && (n[1] - 0.8).abs() < 1e-6);
        let n = prepare_vector(Space::L2, true, &v);
        assert!((n[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_run_batch_keeps_order() {
        let items: Vec<u32> = (0..100).collect();
        let out = run_batch(None, &items, |&x| x * 2);
        assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());

        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let out = run_batch(Some(&pool), &items, |&x| x + 1);
        assert_eq!(out[99], 100);
    }
}
