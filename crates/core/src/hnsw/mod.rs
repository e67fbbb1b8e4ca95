//! Hierarchical Navigable Small World (HNSW) proximity graph.
//!
//! Nodes live in a fixed-capacity arena addressed by dense `u32` internal ids.
//! Every node carries its own vector and neighbor-list locks, so inserts and
//! searches run concurrently; only resizing needs the whole graph exclusively.

/// Distance spaces: squared L2, inner product, and cosine.
pub mod distance;
/// Graph parameters, entry point, and level generator.
pub mod graph;
/// Insertion with bidirectional links and heuristic pruning.
pub mod insert;
/// Label ↔ internal id directory.
pub mod labels;
/// Single-layer beam search and multi-layer KNN.
pub mod search;
/// Node arena with per-node locks.
pub mod store;
/// Generation-based visited set.
pub mod visited;

pub use distance::Space;
pub use graph::{EntryPoint, Graph, GraphParams};
pub use labels::LabelDirectory;
pub use search::knn_search;
pub use store::{Allocation, NodeSnapshot, NodeStore};
