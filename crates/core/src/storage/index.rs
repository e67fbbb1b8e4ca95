//! The public engine: [`IndexConfig`] and the thread-safe [`VectorIndex`].
//!
//! Lock order, outermost first: `graph` → `write_gate` → label stripe →
//! label directory → slot allocator → node locks. Queries only take `graph`
//! shared and node read locks.

use crate::config::{
    CONFIG_FILE_NAME, DEFAULT_MAX_ELEMENTS, DEFAULT_RANDOM_SEED, DEFAULT_RESIZE_FACTOR,
    HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_EF_SEARCH, HNSW_DEFAULT_M, HNSW_DEFAULT_MAX_LAYERS,
    LABEL_LOCK_STRIPES, MAX_K,
};
use crate::error::{IndexError, Result};
use crate::hnsw::distance::Space;
use crate::hnsw::graph::{Graph, GraphParams};
use crate::hnsw::labels::LabelDirectory;
use crate::hnsw::search::knn_search;
use crate::hnsw::store::Allocation;
use crate::search::{prepare_vector, run_batch, LabelFilter, SearchHit};
use crate::storage::persistence::{self, write_atomic};
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Label predicate for filtered search. `true` = eligible.
pub type LabelPredicate<'a> = &'a (dyn Fn(u64) -> bool + Sync);

/// Runtime configuration of a [`VectorIndex`].
///
/// Build with struct-update syntax over [`Default`]:
///
/// ```
/// use hnswgraph_core::{IndexConfig, Space};
///
/// let config = IndexConfig {
///     dimension: 128,
///     space: Space::Cosine,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    pub space: Space,
    /// Initial capacity. Inserts beyond it fail until `resize`.
    pub max_elements: usize,
    /// Neighbor bound on upper layers; layer 0 uses `2 * m`.
    pub m: usize,
    pub ef_construction: usize,
    /// Default beam width for queries, raised to `k` per query.
    pub ef_search: usize,
    pub max_layers: usize,
    /// Seed of the level generator.
    pub random_seed: u64,
    /// Let deleted slots be reused by later inserts.
    pub allow_replace_deleted: bool,
    /// L2-normalize every vector on entry, regardless of space.
    pub normalize: bool,
    /// Directory holding the persisted index, if any.
    pub persist_location: Option<PathBuf>,
    /// Persist dirty records after every mutating call.
    pub persist_on_write: bool,
    /// Worker threads for batch operations (0 = rayon's global pool).
    pub num_threads: usize,
    pub read_only: bool,
    /// Growth factor applied when a batch insert overflows (≤ 1 disables growth).
    pub resize_factor: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            space: Space::L2,
            max_elements: DEFAULT_MAX_ELEMENTS,
            m: HNSW_DEFAULT_M,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: HNSW_DEFAULT_EF_SEARCH,
            max_layers: HNSW_DEFAULT_MAX_LAYERS,
            random_seed: DEFAULT_RANDOM_SEED,
            allow_replace_deleted: false,
            normalize: false,
            persist_location: None,
            persist_on_write: false,
            num_threads: 0,
            read_only: false,
            resize_factor: DEFAULT_RESIZE_FACTOR,
        }
    }
}

impl IndexConfig {
    pub fn graph_params(&self) -> GraphParams {
        GraphParams {
            space: self.space,
            dimension: self.dimension,
            m: self.m,
            m_max0: 2 * self.m,
            ef_construction: self.ef_construction,
            max_layers: self.max_layers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.graph_params().validate()?;
        self.validate_runtime()
    }

    /// Checks on the knobs that stay caller-controlled when resuming.
    fn validate_runtime(&self) -> Result<()> {
        if self.ef_search == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_search must be positive".into(),
            ));
        }
        if self.max_elements > u32::MAX as usize {
            return Err(IndexError::InvalidConfiguration(format!(
                "max_elements {} exceeds {}",
                self.max_elements,
                u32::MAX
            )));
        }
        if !self.resize_factor.is_finite() {
            return Err(IndexError::InvalidConfiguration(
                "resize_factor must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Read the `config.json` sidecar written next to a persisted index.
    pub fn load_sidecar(dir: &Path) -> Result<Self> {
        let raw = fs::read(dir.join(CONFIG_FILE_NAME))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write_sidecar(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(CONFIG_FILE_NAME), &json)?;
        Ok(())
    }
}

/// How [`VectorIndex::create_or_load`] opened the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Nothing was persisted at the location (or there is no location).
    Fresh,
    /// An existing snapshot was loaded.
    Resuming,
}

impl OpenMode {
    pub fn detect(config: &IndexConfig) -> Self {
        match &config.persist_location {
            Some(dir) if persistence::snapshot_exists(dir) => OpenMode::Resuming,
            _ => OpenMode::Fresh,
        }
    }
}

/// Thread-safe approximate nearest-neighbor index over labeled vectors.
///
/// All operations take `&self`; share it behind an `Arc` across threads.
pub struct VectorIndex {
    config: IndexConfig,
    mode: OpenMode,
    ef_search: AtomicUsize,
    graph: RwLock<Graph>,
    labels: Mutex<LabelDirectory>,
    label_locks: Vec<Mutex<()>>,
    /// Shared by mutations, exclusive by `persist_dirty`.
    write_gate: RwLock<()>,
    header_dirty: AtomicBool,
    pool: Option<ThreadPool>,
    closed: AtomicBool,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("current_count", &self.current_count())
            .field("deleted_count", &self.deleted_count())
            .finish()
    }
}

impl VectorIndex {
    /// Open the index described by `config`.
    ///
    /// If `persist_location` holds a snapshot it is loaded: structural
    /// parameters come from the snapshot, capacity is the larger of the two,
    /// and the behavioral knobs of `config` apply. Otherwise a fresh index is
    /// created and, with a location, an empty snapshot is written right away.
    pub fn create_or_load(config: IndexConfig) -> Result<Self> {
        let mode = OpenMode::detect(&config);
        match mode {
            OpenMode::Fresh => config.validate()?,
            OpenMode::Resuming => config.validate_runtime()?,
        }
        let mut config = config;

        let (graph, labels, header_stale) = match mode {
            OpenMode::Fresh => {
                let graph = Graph::new(config.graph_params(), config.max_elements, config.random_seed);
                (graph, LabelDirectory::new(), false)
            }
            OpenMode::Resuming => {
                let dir = config
                    .persist_location
                    .clone()
                    .ok_or_else(|| IndexError::InvalidConfiguration("no persist location".into()))?;
                let loaded = persistence::load_snapshot(&dir, config.max_elements)?;
                if config.dimension != 0 && loaded.params.dimension != config.dimension {
                    tracing::warn!(
                        "Requested dimension {} differs from persisted dimension {}, using the persisted one",
                        config.dimension,
                        loaded.params.dimension
                    );
                }
                config.dimension = loaded.params.dimension;
                config.space = loaded.params.space;
                config.m = loaded.params.m;
                config.ef_construction = loaded.params.ef_construction;
                config.max_layers = loaded.params.max_layers;
                config.max_elements = loaded.store.capacity();
                let header_stale = loaded.store.capacity() > loaded.header_capacity;

                let graph = Graph::from_parts(
                    loaded.params,
                    loaded.store,
                    loaded.entry,
                    config.random_seed,
                );
                let labels = rebuild_labels(&graph, config.allow_replace_deleted);
                (graph, labels, header_stale)
            }
        };

        let pool = match config.num_threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| IndexError::InvalidConfiguration(e.to_string()))?,
            ),
        };

        let index = Self {
            ef_search: AtomicUsize::new(config.ef_search),
            mode,
            graph: RwLock::new(graph),
            labels: Mutex::new(labels),
            label_locks: (0..LABEL_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            write_gate: RwLock::new(()),
            header_dirty: AtomicBool::new(header_stale),
            pool,
            closed: AtomicBool::new(false),
            config,
        };

        if let (OpenMode::Fresh, Some(dir), false) =
            (mode, &index.config.persist_location, index.config.read_only)
        {
            let graph = index.graph.read();
            persistence::save_snapshot(&graph, dir)?;
            graph.store.clear_dirty();
            index.config.write_sidecar(dir)?;
        }

        tracing::info!(
            "Opened index ({:?}): dim={}, space={}, capacity={}, elements={}",
            mode,
            index.config.dimension,
            index.config.space,
            index.max_elements(),
            index.current_count()
        );
        Ok(index)
    }

    /// Whether the index was created fresh or resumed from disk.
    pub fn open_mode(&self) -> OpenMode {
        self.mode
    }

    /// Current effective configuration.
    pub fn config(&self) -> IndexConfig {
        IndexConfig {
            ef_search: self.ef_search(),
            max_elements: self.max_elements(),
            ..self.config.clone()
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn space(&self) -> Space {
        self.config.space
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    pub fn set_ef_search(&self, ef: usize) -> Result<()> {
        if ef == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_search must be positive".into(),
            ));
        }
        self.ef_search.store(ef, Ordering::Relaxed);
        Ok(())
    }

    /// Slots in use, deleted ones included.
    pub fn current_count(&self) -> usize {
        self.graph.read().store.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.graph.read().store.deleted_count()
    }

    pub fn active_count(&self) -> usize {
        let graph = self.graph.read();
        graph.store.len() - graph.store.deleted_count()
    }

    pub fn max_elements(&self) -> usize {
        self.graph.read().store.capacity()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(IndexError::ReadOnly);
        }
        Ok(())
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    fn label_lock(&self, label: u64) -> &Mutex<()> {
        &self.label_locks[label_stripe(label)]
    }

    fn maybe_persist(&self) -> Result<()> {
        if self.config.persist_on_write {
            self.persist_dirty()?;
        }
        Ok(())
    }

    // ---- Mutations ----

    /// Insert `vector` under `label`.
    ///
    /// A live `label` is replaced when `replace_deleted` is set, otherwise the
    /// call fails with [`IndexError::DuplicateLabel`]. A deleted `label` is
    /// revived in place with the new vector.
    pub fn insert(&self, vector: &[f32], label: u64, replace_deleted: bool) -> Result<()> {
        self.ensure_writable()?;
        self.check_dimension(vector.len())?;
        {
            let graph = self.graph.read();
            let _gate = self.write_gate.read();
            self.insert_locked(&graph, vector, label, replace_deleted)?;
        }
        self.maybe_persist()
    }

    fn insert_locked(
        &self,
        graph: &Graph,
        vector: &[f32],
        label: u64,
        replace_deleted: bool,
    ) -> Result<()> {
        let _label_guard = self.label_lock(label).lock();
        let vector = prepare_vector(self.config.space, self.config.normalize, vector).into_owned();
        let store = &graph.store;
        let reuse = self.config.allow_replace_deleted;

        // Claim a slot under the directory lock so no other label can take it.
        let (id, fresh) = {
            let mut labels = self.labels.lock();
            match labels.lookup(label).ok() {
                Some(id) if !store.is_deleted(id) => {
                    if !replace_deleted {
                        return Err(IndexError::DuplicateLabel(label));
                    }
                    if reuse {
                        // The old slot would be freed and popped straight back
                        (id, false)
                    } else {
                        let fresh = store.allocate(false)?;
                        store.mark_deleted(id);
                        labels.unbind(label);
                        labels.bind(label, fresh.id());
                        (fresh.id(), true)
                    }
                }
                Some(id) => {
                    store.withdraw(id);
                    (id, false)
                }
                None => {
                    let slot = store.allocate(replace_deleted && reuse)?;
                    labels.bind(label, slot.id());
                    (slot.id(), matches!(slot, Allocation::Fresh(_)))
                }
            }
        };

        if fresh {
            let level = graph.random_level();
            store.init_slot(id, label, vector, level);
        } else {
            store.overwrite(id, label, vector);
        }
        graph.link(id);
        store.unmark_deleted(id);
        Ok(())
    }

    /// Insert many vectors. Labels must be unique within the batch and every
    /// vector is dimension-checked before anything is inserted.
    ///
    /// When `resize_factor > 1` and the batch does not fit, capacity first
    /// grows to `max(ceil(capacity * resize_factor), count + batch)`.
    pub fn insert_batch(
        &self,
        vectors: &[Vec<f32>],
        labels: &[u64],
        replace_deleted: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        if vectors.len() != labels.len() {
            return Err(IndexError::InvalidConfiguration(format!(
                "{} vectors but {} labels",
                vectors.len(),
                labels.len()
            )));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for &label in labels {
            if !seen.insert(label) {
                return Err(IndexError::DuplicateLabel(label));
            }
        }
        for v in vectors {
            self.check_dimension(v.len())?;
        }
        if vectors.is_empty() {
            return Ok(());
        }

        self.grow_for_batch(labels.len())?;

        let items: Vec<(&Vec<f32>, u64)> = vectors.iter().zip(labels.iter().copied()).collect();
        {
            let graph = self.graph.read();
            let _gate = self.write_gate.read();
            self.check_batch_fits(&graph, labels, replace_deleted)?;
            let graph_ref: &Graph = &graph;
            let results = run_batch(self.pool.as_ref(), &items, |&(v, label)| {
                self.insert_locked(graph_ref, v, label, replace_deleted)
            });
            results.into_iter().collect::<Result<Vec<()>>>()?;
        }
        self.maybe_persist()
    }

    /// Reject a batch that would fail part way: a live label without
    /// `replace_deleted`, or more new slots than capacity and pool provide.
    fn check_batch_fits(&self, graph: &Graph, labels: &[u64], replace_deleted: bool) -> Result<()> {
        let store = &graph.store;
        let reuse = self.config.allow_replace_deleted;
        let directory = self.labels.lock();
        let mut new_slots = 0usize;
        let mut revived = 0usize;
        for &label in labels {
            match directory.lookup(label).ok() {
                Some(id) if !store.is_deleted(id) => {
                    if !replace_deleted {
                        return Err(IndexError::DuplicateLabel(label));
                    }
                    if !reuse {
                        new_slots += 1;
                    }
                }
                Some(_) => revived += 1,
                None => new_slots += 1,
            }
        }
        let pooled = if replace_deleted && reuse {
            store.free_slots().saturating_sub(revived)
        } else {
            0
        };
        let available = store.capacity() - store.len() + pooled;
        if new_slots > available {
            return Err(IndexError::CapacityExceeded {
                capacity: store.capacity(),
            });
        }
        Ok(())
    }

    fn grow_for_batch(&self, incoming: usize) -> Result<()> {
        if self.config.resize_factor <= 1.0 {
            return Ok(());
        }
        let mut graph = self.graph.write();
        let capacity = graph.store.capacity();
        let needed = graph.store.len() + incoming;
        if needed <= capacity {
            return Ok(());
        }
        let grown = (capacity as f64 * self.config.resize_factor as f64).ceil() as usize;
        let target = grown.max(needed);
        graph.store.resize(target)?;
        self.header_dirty.store(true, Ordering::Release);
        tracing::info!("Grew index capacity {} -> {} for batch insert", capacity, target);
        Ok(())
    }

    /// Soft-delete `label`. Its node stays linked but is never returned.
    pub fn delete(&self, label: u64) -> Result<()> {
        self.ensure_writable()?;
        {
            let graph = self.graph.read();
            let _gate = self.write_gate.read();
            self.delete_locked(&graph, label)?;
        }
        self.maybe_persist()
    }

    fn delete_locked(&self, graph: &Graph, label: u64) -> Result<()> {
        let _label_guard = self.label_lock(label).lock();
        let labels = self.labels.lock();
        self.delete_bound(graph, &labels, label)
    }

    fn delete_bound(&self, graph: &Graph, labels: &LabelDirectory, label: u64) -> Result<()> {
        let id = labels.lookup(label)?;
        if !graph.store.mark_deleted(id) {
            return Err(IndexError::NotFound(label));
        }
        if self.config.allow_replace_deleted {
            graph.store.release(id);
        }
        Ok(())
    }

    /// Soft-delete several labels. All must be live and unique.
    pub fn delete_batch(&self, labels: &[u64]) -> Result<()> {
        self.ensure_writable()?;
        let mut seen = HashSet::with_capacity(labels.len());
        for &label in labels {
            if !seen.insert(label) {
                return Err(IndexError::DuplicateLabel(label));
            }
        }
        {
            let graph = self.graph.read();
            let _gate = self.write_gate.read();
            // Stripes are always taken in ascending order
            let mut stripes: Vec<usize> = labels.iter().map(|&l| label_stripe(l)).collect();
            stripes.sort_unstable();
            stripes.dedup();
            let _stripe_guards: Vec<_> = stripes.iter().map(|&s| self.label_locks[s].lock()).collect();
            let directory = self.labels.lock();
            for &label in labels {
                let id = directory.lookup(label)?;
                if graph.store.is_deleted(id) {
                    return Err(IndexError::NotFound(label));
                }
            }
            for &label in labels {
                self.delete_bound(&graph, &directory, label)?;
            }
        }
        self.maybe_persist()
    }

    /// Restore a soft-deleted `label`. A live label is left as is.
    pub fn undelete(&self, label: u64) -> Result<()> {
        self.ensure_writable()?;
        {
            let graph = self.graph.read();
            let _gate = self.write_gate.read();
            let _label_guard = self.label_lock(label).lock();
            let labels = self.labels.lock();
            if labels.is_retired(label) {
                return Err(IndexError::AlreadyReused(label));
            }
            let id = labels.lookup(label)?;
            if !graph.store.is_deleted(id) {
                return Ok(());
            }
            graph.store.withdraw(id);
            graph.store.unmark_deleted(id);
        }
        self.maybe_persist()
    }

    /// Change capacity. Fails with [`IndexError::InvalidCapacity`] below the
    /// current element count.
    pub fn resize(&self, new_capacity: usize) -> Result<()> {
        self.ensure_writable()?;
        if new_capacity > u32::MAX as usize {
            return Err(IndexError::InvalidConfiguration(format!(
                "capacity {} exceeds {}",
                new_capacity,
                u32::MAX
            )));
        }
        {
            let mut graph = self.graph.write();
            let old = graph.store.capacity();
            graph.store.resize(new_capacity)?;
            self.header_dirty.store(true, Ordering::Release);
            tracing::info!("Resized index capacity {} -> {}", old, new_capacity);
        }
        self.maybe_persist()
    }

    // ---- Queries ----

    /// The `k` nearest live vectors to `query`, closest first.
    ///
    /// Fails with [`IndexError::InsufficientResults`] when fewer than `k`
    /// eligible vectors are reachable.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<LabelPredicate<'_>>,
    ) -> Result<Vec<SearchHit>> {
        self.search_with_ef(query, k, self.ef_search(), filter)
    }

    /// [`search`](Self::search) with an explicit beam width.
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: Option<LabelPredicate<'_>>,
    ) -> Result<Vec<SearchHit>> {
        self.check_query(query.len(), k)?;
        let graph = self.graph.read();
        self.search_locked(&graph, query, k, ef, filter)
    }

    /// Run one search per query on the worker pool. Results keep query order.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        filter: Option<LabelPredicate<'_>>,
    ) -> Result<Vec<Vec<SearchHit>>> {
        for q in queries {
            self.check_query(q.len(), k)?;
        }
        let ef = self.ef_search();
        let graph = self.graph.read();
        let graph_ref: &Graph = &graph;
        run_batch(self.pool.as_ref(), queries, |q| {
            self.search_locked(graph_ref, q, k, ef, filter)
        })
        .into_iter()
        .collect()
    }

    fn check_query(&self, len: usize, k: usize) -> Result<()> {
        self.check_dimension(len)?;
        if k > MAX_K {
            return Err(IndexError::InvalidConfiguration(format!(
                "k {} exceeds maximum {}",
                k,
                MAX_K
            )));
        }
        Ok(())
    }

    fn search_locked(
        &self,
        graph: &Graph,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: Option<LabelPredicate<'_>>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = prepare_vector(self.config.space, self.config.normalize, query);
        let store = &graph.store;
        let eligible =
            |id: u32| !store.is_deleted(id) && filter.map_or(true, |f| f(store.label(id)));
        let found = knn_search(graph, &query, k, ef, &eligible);
        if found.len() < k {
            return Err(IndexError::InsufficientResults {
                requested: k,
                found: found.len(),
            });
        }
        Ok(found
            .into_iter()
            .map(|(distance, id)| SearchHit {
                label: store.label(id),
                distance,
            })
            .collect())
    }

    /// Stored vector of a live label, as normalized on insert.
    pub fn get_vector(&self, label: u64) -> Result<Vec<f32>> {
        let graph = self.graph.read();
        let id = self.labels.lock().lookup(label)?;
        if graph.store.is_deleted(id) {
            return Err(IndexError::NotFound(label));
        }
        Ok(graph.store.vector(id))
    }

    pub fn get_vectors(&self, labels: &[u64]) -> Result<Vec<Vec<f32>>> {
        labels.iter().map(|&l| self.get_vector(l)).collect()
    }

    /// Whether `label` is bound to a live element.
    pub fn contains(&self, label: u64) -> bool {
        let graph = self.graph.read();
        let id = self.labels.lock().lookup(label).ok();
        id.is_some_and(|id| !graph.store.is_deleted(id))
    }

    /// Labels in internal-id order.
    pub fn list_labels(&self, filter: LabelFilter) -> Vec<u64> {
        let graph = self.graph.read();
        let labels = self.labels.lock();
        (0..graph.store.len() as u32)
            .filter_map(|id| {
                let label = labels.reverse(id)?;
                filter.admits(graph.store.is_deleted(id)).then_some(label)
            })
            .collect()
    }

    // ---- Persistence ----

    /// Write a full snapshot into `path`. Takes the index exclusively.
    ///
    /// Saving into the persist location also clears every dirty mark.
    pub fn save(&self, path: &Path) -> Result<()> {
        let graph = self.graph.write();
        persistence::save_snapshot(&graph, path)?;
        let effective = IndexConfig {
            ef_search: self.ef_search(),
            max_elements: graph.store.capacity(),
            ..self.config.clone()
        };
        effective.write_sidecar(path)?;
        if self.config.persist_location.as_deref() == Some(path) {
            graph.store.clear_dirty();
            self.header_dirty.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Rewrite changed records at the persist location.
    ///
    /// Runs alongside queries but waits for in-flight mutations. A no-op
    /// without a location or when read-only.
    pub fn persist_dirty(&self) -> Result<()> {
        let Some(dir) = self.config.persist_location.as_deref() else {
            return Ok(());
        };
        if self.config.read_only {
            return Ok(());
        }
        let graph = self.graph.read();
        let _gate = self.write_gate.write();
        let header_changed = self.header_dirty.swap(false, Ordering::AcqRel);
        if let Err(e) = persistence::write_dirty(&graph, dir, header_changed) {
            if header_changed {
                self.header_dirty.store(true, Ordering::Release);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Flush pending changes when `persist_on_write` is on. Also run on drop.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.maybe_persist()?;
        tracing::info!("Closed index ({} elements)", self.current_count());
        Ok(())
    }
}

impl Drop for VectorIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to flush index on drop: {}", e);
        }
    }
}

fn label_stripe(label: u64) -> usize {
    (label % LABEL_LOCK_STRIPES as u64) as usize
}

/// Rebuild the label directory from restored slots.
///
/// Live slots win over deleted ones carrying the same label. With reuse on,
/// deleted slots are pooled so the highest id is handed out first.
fn rebuild_labels(graph: &Graph, allow_reuse: bool) -> LabelDirectory {
    let store = &graph.store;
    let count = store.len() as u32;
    let mut labels = LabelDirectory::new();
    for id in (0..count).filter(|&id| store.is_deleted(id)) {
        labels.bind(store.label(id), id);
        if allow_reuse {
            store.release(id);
        }
    }
    for id in (0..count).filter(|&id| !store.is_deleted(id)) {
        labels.bind(store.label(id), id);
    }
    labels
}
