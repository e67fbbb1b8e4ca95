//! Storage layer: the engine facade, on-disk format, and persistence.
//!
//! The graph lives in memory inside a [`VectorIndex`]. Durability comes from
//! fixed-size records in `data.bin` that can be rewritten individually, a
//! checksummed `header.bin`, and a `config.json` sidecar.

/// On-disk header and record layout.
pub mod format;
/// Engine facade and runtime configuration.
pub mod index;
/// Snapshot save/load and incremental dirty-record persistence.
pub mod persistence;

pub use index::{IndexConfig, LabelPredicate, OpenMode, VectorIndex};
