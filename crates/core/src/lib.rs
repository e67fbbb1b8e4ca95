//! # hnswgraph-core
//!
//! Embeddable approximate nearest-neighbor index built on a hierarchical
//! navigable small world (HNSW) graph, with soft deletion, slot reuse,
//! capacity growth and crash-safe persistence.
//!
//! This is the engine crate with zero async dependencies. Every operation of
//! [`VectorIndex`] takes `&self` and is safe to call from many threads.
//!
//! ```
//! use hnswgraph_core::{IndexConfig, VectorIndex};
//!
//! let index = VectorIndex::create_or_load(IndexConfig {
//!     dimension: 4,
//!     max_elements: 100,
//!     ..Default::default()
//! })?;
//! index.insert(&[0.0, 0.0, 0.0, 0.0], 1, false)?;
//! index.insert(&[1.0, 0.0, 0.0, 0.0], 2, false)?;
//! index.insert(&[10.0, 10.0, 10.0, 10.0], 3, false)?;
//!
//! let hits = index.search(&[0.0, 0.0, 0.0, 1.0], 2, None)?;
//! assert_eq!(hits.iter().map(|h| h.label).collect::<Vec<_>>(), vec![1, 2]);
//! # Ok::<(), hnswgraph_core::IndexError>(())
//! ```

/// Global configuration constants: limits, defaults, and file names.
pub mod config;
/// Error type shared by every operation.
pub mod error;
/// HNSW graph: distance spaces, node store, label directory, insertion and search.
pub mod hnsw;
/// Search hits, label filters, and batch execution.
pub mod search;
/// Engine facade, on-disk format, and persistence.
pub mod storage;

pub use error::{IndexError, Result};
pub use hnsw::Space;
pub use search::{LabelFilter, SearchHit};
pub use storage::{IndexConfig, LabelPredicate, OpenMode, VectorIndex};
