//! HNSW search: greedy descent, single-layer beam search and multi-layer KNN.
//!
//! Eligibility is a predicate `Fn(u32) -> bool` over internal ids. Ineligible
//! nodes (soft-deleted, filtered out) are still traversed so the filtered graph
//! stays connected, but never enter the result set.

use crate::config;
use crate::hnsw::graph::Graph;
use crate::hnsw::visited::{with_visited, VisitedSet};
use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// `(distance, internal id)` ordered by distance, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scored {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Scored {
    fn new(distance: f32, id: u32) -> Self {
        Self {
            distance: OrderedFloat(distance),
            id,
        }
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Move one hop at a time to the closest neighbor on `layer` until no neighbor
/// improves on the current node.
pub fn greedy_closest(
    graph: &Graph,
    query: &[f32],
    mut current: u32,
    mut current_dist: f32,
    layer: usize,
) -> (u32, f32) {
    let space = graph.space();
    let mut neighbors = Vec::new();
    loop {
        let mut changed = false;
        graph.store.copy_neighbors(current, layer, &mut neighbors);
        for &n in &neighbors {
            let d = graph.store.distance_to(space, query, n);
            if d < current_dist {
                current_dist = d;
                current = n;
                changed = true;
            }
        }
        if !changed {
            return (current, current_dist);
        }
    }
}

/// Beam search over one layer.
///
/// Returns up to `ef` eligible nodes as `(distance, id)` ascending.
/// `visited` must be cleared by the caller.
pub fn search_layer<F: Fn(u32) -> bool>(
    graph: &Graph,
    query: &[f32],
    entry_points: &[(f32, u32)],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    eligible: &F,
) -> Vec<(f32, u32)> {
    let space = graph.space();
    let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst result distance, avoids heap peeks in the hot loop
    let mut worst_dist = f32::MAX;

    for &(dist, ep) in entry_points {
        if visited.insert(ep) {
            candidates.push(Reverse(Scored::new(dist, ep)));
            if eligible(ep) {
                results.push(Scored::new(dist, ep));
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    let mut neighbors = Vec::new();
    while let Some(Reverse(candidate)) = candidates.pop() {
        if results.len() >= ef && candidate.distance.0 > worst_dist {
            break;
        }

        graph
            .store
            .copy_neighbors(candidate.id, layer, &mut neighbors);
        for &neighbor in &neighbors {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = graph.store.distance_to(space, query, neighbor);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Reverse(Scored::new(dist, neighbor)));
                if eligible(neighbor) {
                    results.push(Scored::new(dist, neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Multi-layer KNN search.
///
/// Descends greedily to layer 0, then beam-searches with `ef` (raised to `k`).
/// If fewer than `k` eligible nodes were found, ef is doubled up to
/// [`config::HNSW_EF_WIDENING_FACTOR`] times the base before giving up.
/// The result may hold fewer than `k` entries.
pub fn knn_search<F: Fn(u32) -> bool>(
    graph: &Graph,
    query: &[f32],
    k: usize,
    ef: usize,
    eligible: &F,
) -> Vec<(f32, u32)> {
    let entry = graph.entry_point();
    let Some(entry_id) = entry.id else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    let space = graph.space();
    let mut current = entry_id;
    let mut current_dist = graph.store.distance_to(space, query, current);
    for layer in (1..=entry.max_level).rev() {
        (current, current_dist) = greedy_closest(graph, query, current, current_dist, layer);
    }

    let node_count = graph.store.len();
    let base_ef = ef.max(k);
    let max_ef = (base_ef * config::HNSW_EF_WIDENING_FACTOR)
        .min(node_count)
        .max(base_ef);
    let mut ef = base_ef;
    let start = [(current_dist, current)];

    let mut results = with_visited(graph.store.capacity(), |visited| loop {
        let found = search_layer(graph, query, &start, ef, 0, visited, eligible);
        if found.len() >= k || ef >= max_ef {
            break found;
        }
        ef = (ef * 2).min(max_ef);
        visited.clear();
    });
    results.truncate(k);
    results
}
