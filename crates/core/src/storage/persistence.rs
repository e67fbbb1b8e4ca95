//! Disk persistence for the graph.
//!
//! Full snapshots write `data.bin` and `header.bin` through a temp file and an
//! atomic rename each, data first. Incremental persists rewrite only dirty
//! records in place (`id * record_size`), fsync, then replace the header.
//! Every load is fully validated before a single node becomes visible.

use crate::config::{DATA_FILE_NAME, HEADER_FILE_NAME};
use crate::error::{IndexError, Result};
use crate::hnsw::distance::Space;
use crate::hnsw::graph::{EntryPoint, Graph, GraphParams};
use crate::hnsw::store::{NodeSnapshot, NodeStore};
use crate::storage::format::{Header, RecordLayout};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A validated snapshot, ready to be wrapped in a [`Graph`].
#[derive(Debug)]
pub struct LoadedGraph {
    pub params: GraphParams,
    pub entry: EntryPoint,
    pub store: NodeStore,
    /// Capacity recorded in the header, before any growth to `min_capacity`.
    pub header_capacity: usize,
}

pub fn header_path(dir: &Path) -> PathBuf {
    dir.join(HEADER_FILE_NAME)
}

pub fn data_path(dir: &Path) -> PathBuf {
    dir.join(DATA_FILE_NAME)
}

/// Whether `dir` holds a previously written index.
pub fn snapshot_exists(dir: &Path) -> bool {
    header_path(dir).is_file()
}

/// Write `bytes` to `path` via a temp file, fsync and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut opts = OpenOptions::new();
    opts.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}

fn create_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

fn current_header(graph: &Graph) -> Header {
    Header::new(
        &graph.params,
        graph.store.capacity(),
        graph.store.len(),
        graph.store.deleted_count(),
        graph.entry_point(),
    )
}

/// Write a complete snapshot of `graph` into `dir`.
///
/// The caller must hold the graph exclusively so the snapshot is consistent.
pub fn save_snapshot(graph: &Graph, dir: &Path) -> Result<()> {
    create_dir(dir)?;
    let layout = RecordLayout::from_params(&graph.params);
    let count = graph.store.len();

    let mut data = Vec::with_capacity(count * layout.record_size());
    for id in 0..count as u32 {
        layout.encode(&graph.store.snapshot(id), &mut data)?;
    }
    let header = current_header(graph);
    let header_bytes = header.encode()?;

    write_atomic(&data_path(dir), &data)?;
    write_atomic(&header_path(dir), &header_bytes)?;

    tracing::info!(
        "Saved index to {:?} ({} elements, {} deleted, {} bytes)",
        dir,
        count,
        header.deleted_count,
        data.len() + header_bytes.len()
    );
    Ok(())
}

/// Rewrite dirty records of `graph` in place, then the header.
///
/// Mutations must be excluded for the duration (write gate held). Returns the
/// number of records written. Nothing is written if no record is dirty and
/// `header_changed` is false. Failed records stay dirty.
pub fn write_dirty(graph: &Graph, dir: &Path, header_changed: bool) -> Result<usize> {
    let ids = graph.store.take_dirty();
    if ids.is_empty() && !header_changed {
        return Ok(0);
    }

    let result = write_records(graph, dir, &ids).and_then(|()| {
        let header = current_header(graph).encode()?;
        write_atomic(&header_path(dir), &header)?;
        Ok(())
    });
    if let Err(e) = result {
        graph.store.mark_dirty(&ids);
        return Err(e);
    }

    tracing::debug!("Persisted {} dirty records to {:?}", ids.len(), dir);
    Ok(ids.len())
}

fn write_records(graph: &Graph, dir: &Path, ids: &[u32]) -> Result<()> {
    let layout = RecordLayout::from_params(&graph.params);
    let record_size = layout.record_size() as u64;
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(data_path(dir))?;

    let mut buf = Vec::with_capacity(layout.record_size());
    for &id in ids {
        buf.clear();
        layout.encode(&graph.store.snapshot(id), &mut buf)?;
        file.seek(SeekFrom::Start(id as u64 * record_size))?;
        file.write_all(&buf)?;
    }
    file.sync_all()?;
    Ok(())
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::CorruptPersistedState(msg.into())
}

/// Read and validate the snapshot in `dir`.
///
/// The store is sized to `max(header capacity, min_capacity)`.
pub fn load_snapshot(dir: &Path, min_capacity: usize) -> Result<LoadedGraph> {
    let header = Header::decode(&fs::read(header_path(dir))?)?;
    let params = params_from_header(&header)?;
    let layout = RecordLayout::from_params(&params);
    let record_size = layout.record_size();
    if header.record_size != record_size as u64 {
        return Err(corrupt(format!(
            "header record size {} disagrees with layout size {}",
            header.record_size, record_size
        )));
    }

    let count = header.count as usize;
    let capacity = header.capacity as usize;
    if count > capacity {
        return Err(corrupt(format!(
            "element count {} exceeds capacity {}",
            count, capacity
        )));
    }
    if capacity > u32::MAX as usize {
        return Err(corrupt(format!("capacity {} out of range", capacity)));
    }

    let mut data = File::open(data_path(dir))?;
    let data_len = data.metadata()?.len();
    if data_len < (count * record_size) as u64 {
        return Err(corrupt(format!(
            "data segment holds {} bytes, {} records need {}",
            data_len,
            count,
            count * record_size
        )));
    }
    let mut raw = vec![0u8; count * record_size];
    data.read_exact(&mut raw)?;

    let nodes = raw
        .chunks_exact(record_size)
        .enumerate()
        .map(|(id, bytes)| layout.decode(id as u32, bytes))
        .collect::<Result<Vec<_>>>()?;

    let entry = header.entry();
    validate_nodes(&nodes, &params, entry, header.deleted_count as usize)?;

    let mut store = NodeStore::new(params.dimension, capacity.max(min_capacity));
    for (id, node) in nodes.into_iter().enumerate() {
        store.restore(id as u32, node);
    }

    tracing::info!(
        "Loaded index from {:?} ({} elements, {} deleted, dim {}, {})",
        dir,
        count,
        store.deleted_count(),
        params.dimension,
        params.space
    );
    Ok(LoadedGraph {
        params,
        entry,
        store,
        header_capacity: capacity,
    })
}

fn params_from_header(header: &Header) -> Result<GraphParams> {
    let space = Space::from_code(header.space).map_err(|e| corrupt(e.to_string()))?;
    let params = GraphParams {
        space,
        dimension: header.dimension as usize,
        m: header.m as usize,
        m_max0: header.m_max0 as usize,
        ef_construction: header.ef_construction as usize,
        max_layers: header.max_layers as usize,
    };
    params.validate().map_err(|e| corrupt(e.to_string()))?;
    Ok(params)
}

/// Cross-record invariants that single-record decoding cannot see.
fn validate_nodes(
    nodes: &[NodeSnapshot],
    params: &GraphParams,
    entry: EntryPoint,
    expected_deleted: usize,
) -> Result<()> {
    let count = nodes.len();
    match entry.id {
        None if count > 0 => return Err(corrupt("non-empty index without entry point")),
        Some(ep) if ep as usize >= count => {
            return Err(corrupt(format!("entry point {} out of range", ep)));
        }
        Some(ep) if nodes[ep as usize].level() != entry.max_level => {
            return Err(corrupt(format!(
                "entry point {} has level {}, header says {}",
                ep,
                nodes[ep as usize].level(),
                entry.max_level
            )));
        }
        _ => {}
    }
    if entry.max_level >= params.max_layers {
        return Err(corrupt(format!("max level {} out of range", entry.max_level)));
    }

    let mut live_labels = HashSet::with_capacity(count);
    let mut deleted = 0usize;
    for (id, node) in nodes.iter().enumerate() {
        if node.level() > entry.max_level {
            return Err(corrupt(format!(
                "node {} has level {} above the entry point's {}",
                id,
                node.level(),
                entry.max_level
            )));
        }
        if node.deleted {
            deleted += 1;
        } else if !live_labels.insert(node.label) {
            return Err(corrupt(format!("duplicate live label {}", node.label)));
        }
        for (layer, list) in node.links.iter().enumerate() {
            for &n in list {
                let target = nodes
                    .get(n as usize)
                    .ok_or_else(|| corrupt(format!("node {} links to missing node {}", id, n)))?;
                if target.level() < layer {
                    return Err(corrupt(format!(
                        "node {} links to node {} on layer {} above its level",
                        id, n, layer
                    )));
                }
            }
        }
    }
    if deleted != expected_deleted {
        return Err(corrupt(format!(
            "header counts {} deleted elements, records hold {}",
            expected_deleted, deleted
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(n: usize) -> Graph {
        let params = GraphParams {
            space: Space::L2,
            dimension: 2,
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            max_layers: 8,
        };
        let graph = Graph::new(params, n + 16, 9);
        for i in 0..n {
            let id = graph.store.allocate(false).unwrap().id();
            let level = graph.random_level();
            graph
                .store
                .init_slot(id, i as u64 * 10, vec![i as f32, (i % 3) as f32], level);
            graph.link(id);
        }
        graph
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(40);
        graph.store.mark_deleted(3);
        save_snapshot(&graph, dir.path()).unwrap();
        assert!(snapshot_exists(dir.path()));

        let loaded = load_snapshot(dir.path(), 0).unwrap();
        assert_eq!(loaded.params, graph.params);
        assert_eq!(loaded.entry, graph.entry_point());
        assert_eq!(loaded.store.len(), 40);
        assert_eq!(loaded.store.capacity(), 56);
        assert_eq!(loaded.store.deleted_count(), 1);
        for id in 0..40u32 {
            assert_eq!(loaded.store.snapshot(id), graph.store.snapshot(id));
        }
    }

    #[test]
    fn test_load_grows_to_requested_capacity() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(&build(5), dir.path()).unwrap();
        let loaded = load_snapshot(dir.path(), 100).unwrap();
        assert_eq!(loaded.store.capacity(), 100);
        assert_eq!(loaded.header_capacity, 21);
    }

    #[test]
    fn test_write_dirty_matches_full_save() {
        let full = tempfile::tempdir().unwrap();
        let incremental = tempfile::tempdir().unwrap();

        let graph = build(10);
        save_snapshot(&graph, incremental.path()).unwrap();
        graph.store.clear_dirty();

        for i in 10..20u64 {
            let id = graph.store.allocate(false).unwrap().id();
            graph.store.init_slot(id, i * 10, vec![i as f32, 0.5], 0);
            graph.link(id);
        }
        graph.store.mark_deleted(2);
        let written = write_dirty(&graph, incremental.path(), false).unwrap();
        assert!(written >= 11);
        assert_eq!(write_dirty(&graph, incremental.path(), false).unwrap(), 0);

        save_snapshot(&graph, full.path()).unwrap();
        let a = fs::read(data_path(full.path())).unwrap();
        let b = fs::read(data_path(incremental.path())).unwrap();
        assert_eq!(a, b);
        let ha = fs::read(header_path(full.path())).unwrap();
        let hb = fs::read(header_path(incremental.path())).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_corrupt_record_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(&build(6), dir.path()).unwrap();
        let path = data_path(dir.path());
        let mut data = fs::read(&path).unwrap();
        data[20] ^= 0x01;
        fs::write(&path, data).unwrap();
        assert!(matches!(
            load_snapshot(dir.path(), 0),
            Err(IndexError::CorruptPersistedState(_))
        ));
    }

    #[test]
    fn test_truncated_data_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(&build(6), dir.path()).unwrap();
        let path = data_path(dir.path());
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 1]).unwrap();
        assert!(matches!(
            load_snapshot(dir.path(), 0),
            Err(IndexError::CorruptPersistedState(_))
        ));
    }

    #[test]
    fn test_duplicate_live_label_rejected() {
        let nodes = vec![
            NodeSnapshot {
                label: 1,
                deleted: false,
                vector: vec![0.0, 0.0],
                links: vec![vec![1]],
            },
            NodeSnapshot {
                label: 1,
                deleted: false,
                vector: vec![1.0, 0.0],
                links: vec![vec![0]],
            },
        ];
        let params = build(0).params;
        let entry = EntryPoint {
            id: Some(0),
            max_level: 0,
        };
        assert!(validate_nodes(&nodes, &params, entry, 0).is_err());
    }
}
