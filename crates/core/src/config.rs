//! Global configuration constants for hnswgraph.
//!
//! Tuning defaults, input validation limits and on-disk file names live here.
//! These are compile-time constants; runtime configuration is carried by
//! [`IndexConfig`](crate::storage::IndexConfig).

/// Default number of bidirectional links per HNSW node on layers above 0.
///
/// Higher values improve recall but increase memory and build time.
/// Layer 0 uses twice this value.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default candidate list size during index construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 100;

/// Default candidate list size during search.
///
/// Always raised to `k` for a given query.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 10;

/// Maximum number of layers in the graph. Levels are capped at `max_layers - 1`.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Upper bound on the adaptive ef widening used when too few eligible
/// results were found (multiple of the base ef).
pub const HNSW_EF_WIDENING_FACTOR: usize = 4;

/// Default capacity of a freshly created index.
pub const DEFAULT_MAX_ELEMENTS: usize = 1_000;

/// Default seed for the level generator.
pub const DEFAULT_RANDOM_SEED: u64 = 100;

/// Default growth factor applied by batch inserts that overflow capacity.
pub const DEFAULT_RESIZE_FACTOR: f32 = 1.2;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Maximum number of results (`k`) per query.
pub const MAX_K: usize = 10_000;

/// Number of striped mutexes serializing operations on the same label.
pub const LABEL_LOCK_STRIPES: usize = 1_024;

/// File holding the fixed-width index header.
pub const HEADER_FILE_NAME: &str = "header.bin";

/// File holding one fixed-size record per internal id.
pub const DATA_FILE_NAME: &str = "data.bin";

/// Human-readable JSON copy of the index configuration.
pub const CONFIG_FILE_NAME: &str = "config.json";
