//! HNSW insertion: linking a written slot into the graph with bidirectional
//! connections and heuristic neighbor pruning (Algorithm 4 of the HNSW paper).

use crate::hnsw::graph::Graph;
use crate::hnsw::search::{greedy_closest, search_layer};
use crate::hnsw::store::NodeStore;
use crate::hnsw::visited::with_visited;
use crate::hnsw::distance::Space;

impl Graph {
    /// Link the node at `id` into the graph.
    ///
    /// The slot must already hold its vector and level. Works for fresh slots
    /// and for reused ones: the node's own lists are rebuilt from scratch and
    /// it never links to itself. Soft-deleted nodes are valid neighbors.
    pub fn link(&self, id: u32) {
        let level = self.store.level(id);
        let Some(entry) = self.claim_entry(id, level) else {
            // First node: nothing to connect to
            return;
        };
        let Some(entry_id) = entry.id else {
            return;
        };

        let space = self.space();
        let query = self.store.vector(id);
        let not_self = |n: u32| n != id;

        // Phase 1: greedy descent through layers above the node's level
        let mut current = entry_id;
        let mut current_dist = self.store.distance_to(space, &query, current);
        for layer in (level + 1..=entry.max_level).rev() {
            (current, current_dist) = greedy_closest(self, &query, current, current_dist, layer);
        }

        // Phase 2: beam search each shared layer, pick the node's own neighbors
        let top = level.min(entry.max_level);
        let mut chosen: Vec<(usize, Vec<u32>)> = Vec::with_capacity(top + 1);
        let mut layer_eps = vec![(current_dist, current)];
        with_visited(self.store.capacity(), |visited| {
            for layer in (0..=top).rev() {
                visited.clear();
                let candidates = search_layer(
                    self,
                    &query,
                    &layer_eps,
                    self.params.ef_construction,
                    layer,
                    visited,
                    &not_self,
                );
                let selected =
                    select_neighbors_heuristic(&self.store, space, &candidates, self.params.m_max(layer));
                let ids: Vec<u32> = selected.iter().map(|&(_, n)| n).collect();
                self.store.set_neighbors(id, layer, ids.clone());
                chosen.push((layer, ids));

                if !candidates.is_empty() {
                    layer_eps = candidates;
                }
            }
        });

        // Phase 3: back-links, pruning neighbors that overflow
        for (layer, ids) in &chosen {
            for &neighbor in ids {
                self.connect(neighbor, id, *layer);
            }
        }

        if level > entry.max_level {
            self.promote_entry(id, level);
        }
    }

    /// Add `new_id` to the neighbor list of `node` at `layer`, re-running the
    /// selection heuristic if the list would exceed its bound.
    fn connect(&self, node: u32, new_id: u32, layer: usize) {
        let space = self.space();
        let bound = self.params.m_max(layer);
        let store = &self.store;
        store.update_neighbors(node, layer, |current| {
            if current.contains(&new_id) {
                return None;
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend_from_slice(current);
            next.push(new_id);
            if next.len() <= bound {
                return Some(next);
            }
            let mut candidates: Vec<(f32, u32)> = next
                .iter()
                .map(|&c| (store.distance_between(space, node, c), c))
                .collect();
            candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let pruned = select_neighbors_heuristic(store, space, &candidates, bound);
            Some(pruned.into_iter().map(|(_, c)| c).collect())
        });
    }
}

/// Heuristic neighbor selection.
///
/// `candidates` are `(distance to base, id)` sorted ascending. A candidate is
/// kept only if it is no closer to an already kept neighbor than to the base.
/// May return fewer than `m` entries.
pub(crate) fn select_neighbors_heuristic(
    store: &NodeStore,
    space: Space,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in candidates {
        if selected.len() >= m {
            break;
        }
        let is_diverse = selected.iter().all(|&(_, sid)| {
            let dist_to_selected = store.distance_between(space, cid, sid);
            dist_to_base <= dist_to_selected
        });
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }
    selected
}
