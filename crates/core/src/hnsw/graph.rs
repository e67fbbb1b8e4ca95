//! HNSW graph structure: structural parameters, node arena, entry point and
//! level generator.
//!
//! [`GraphParams`] are fixed when the graph is created and recovered from the
//! header on load. [`Graph`] owns the [`NodeStore`] and the single piece of
//! global mutable state, the [`EntryPoint`].

use crate::error::{IndexError, Result};
use crate::hnsw::distance::Space;
use crate::hnsw::store::NodeStore;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Structural parameters of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphParams {
    pub space: Space,
    pub dimension: usize,
    /// Neighbor bound on layers above 0.
    pub m: usize,
    /// Neighbor bound on layer 0 (typically `2 * m`).
    pub m_max0: usize,
    pub ef_construction: usize,
    /// Levels are capped at `max_layers - 1`.
    pub max_layers: usize,
}

impl GraphParams {
    /// Neighbor bound at `layer`.
    #[inline]
    pub fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > crate::config::MAX_DIMENSION {
            return Err(IndexError::InvalidConfiguration(format!(
                "dimension must be in 1..={}, got {}",
                crate::config::MAX_DIMENSION,
                self.dimension
            )));
        }
        if self.m < 2 {
            return Err(IndexError::InvalidConfiguration(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        if self.m_max0 < self.m {
            return Err(IndexError::InvalidConfiguration(format!(
                "layer-0 degree {} is below M {}",
                self.m_max0, self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_construction must be positive".into(),
            ));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(IndexError::InvalidConfiguration(format!(
                "max_layers must be in 1..=255, got {}",
                self.max_layers
            )));
        }
        Ok(())
    }
}

/// Global traversal start: the node with the highest level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub id: Option<u32>,
    pub max_level: usize,
}

/// The hierarchical proximity graph.
#[derive(Debug)]
pub struct Graph {
    pub params: GraphParams,
    pub store: NodeStore,
    entry: Mutex<EntryPoint>,
    rng: Mutex<StdRng>,
    level_mult: f64,
}

impl Graph {
    /// Creates an empty graph with room for `capacity` nodes.
    pub fn new(params: GraphParams, capacity: usize, seed: u64) -> Self {
        let store = NodeStore::new(params.dimension, capacity);
        Self::from_parts(params, store, EntryPoint::default(), seed)
    }

    /// Assemble a graph around an already populated store.
    pub fn from_parts(params: GraphParams, store: NodeStore, entry: EntryPoint, seed: u64) -> Self {
        Self {
            level_mult: 1.0 / (params.m as f64).ln(),
            params,
            store,
            entry: Mutex::new(entry),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[inline]
    pub fn space(&self) -> Space {
        self.params.space
    }

    pub fn entry_point(&self) -> EntryPoint {
        *self.entry.lock()
    }

    /// Install `id` as the entry point if the graph is empty.
    /// Returns the current entry point when one already exists.
    pub(crate) fn claim_entry(&self, id: u32, level: usize) -> Option<EntryPoint> {
        let mut entry = self.entry.lock();
        if entry.id.is_some() {
            return Some(*entry);
        }
        *entry = EntryPoint {
            id: Some(id),
            max_level: level,
        };
        None
    }

    /// Promote `id` to entry point if `level` beats the current maximum.
    pub(crate) fn promote_entry(&self, id: u32, level: usize) -> bool {
        let mut entry = self.entry.lock();
        if entry.id.is_none() || level > entry.max_level {
            *entry = EntryPoint {
                id: Some(id),
                max_level: level,
            };
            true
        } else {
            false
        }
    }

    /// Draw a level so that layer population decays geometrically.
    pub fn random_level(&self) -> usize {
        // 1 - U lies in (0, 1], keeping ln finite
        let r: f64 = 1.0 - self.rng.lock().gen::<f64>();
        let level = (-r.ln() * self.level_mult).floor() as usize;
        level.min(self.params.max_layers - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(m: usize) -> GraphParams {
        GraphParams {
            space: Space::L2,
            dimension: 4,
            m,
            m_max0: 2 * m,
            ef_construction: 100,
            max_layers: 16,
        }
    }

    #[test]
    fn test_level_distribution_decays() {
        let graph = Graph::new(params(16), 1, 7);
        let mut per_level = [0usize; 16];
        for _ in 0..20_000 {
            per_level[graph.random_level()] += 1;
        }
        // P(level >= 1) = 1/16
        assert!(per_level[0] > 17_500, "level 0 count {}", per_level[0]);
        assert!(per_level[1] > per_level[2]);
    }

    #[test]
    fn test_same_seed_same_levels() {
        let a = Graph::new(params(8), 1, 42);
        let b = Graph::new(params(8), 1, 42);
        let la: Vec<usize> = (0..100).map(|_| a.random_level()).collect();
        let lb: Vec<usize> = (0..100).map(|_| b.random_level()).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_level_capped() {
        let mut p = params(2);
        p.max_layers = 1;
        let graph = Graph::new(p, 1, 3);
        assert!((0..1000).all(|_| graph.random_level() == 0));
    }

    #[test]
    fn test_entry_point_claim_and_promote() {
        let graph = Graph::new(params(4), 4, 1);
        assert_eq!(graph.claim_entry(0, 1), None);
        let ep = graph.claim_entry(1, 3).unwrap();
        assert_eq!(ep.id, Some(0));
        assert!(!graph.promote_entry(2, 1));
        assert!(graph.promote_entry(3, 2));
        assert_eq!(
            graph.entry_point(),
            EntryPoint {
                id: Some(3),
                max_level: 2
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut p = params(16);
        p.dimension = 0;
        assert!(p.validate().is_err());
        let mut p = params(1);
        p.m_max0 = 2;
        assert!(p.validate().is_err());
        let mut p = params(16);
        p.ef_construction = 0;
        assert!(p.validate().is_err());
        assert!(params(16).validate().is_ok());
    }
}
