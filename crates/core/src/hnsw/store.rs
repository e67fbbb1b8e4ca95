//! Fixed-capacity node arena.
//!
//! Each internal id owns a [`Slot`]: its vector, one neighbor list per layer,
//! its label, and deletion/dirty bits. Vectors and neighbor lists sit behind
//! separate per-node locks. Lock order is always neighbor lists → vector, and a
//! vector write lock is only taken while no other node lock is held.

use crate::error::{IndexError, Result};
use crate::hnsw::distance::Space;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// One arena entry.
#[derive(Debug, Default)]
pub struct Slot {
    vector: RwLock<Vec<f32>>,
    /// `links[layer]` = neighbor ids at that layer. `links.len() == level + 1`.
    links: RwLock<Vec<Vec<u32>>>,
    level: AtomicU8,
    label: AtomicU64,
    deleted: AtomicBool,
    dirty: AtomicBool,
}

/// Owned copy of a slot, used by persistence and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub label: u64,
    pub deleted: bool,
    pub vector: Vec<f32>,
    pub links: Vec<Vec<u32>>,
}

impl NodeSnapshot {
    pub fn level(&self) -> usize {
        self.links.len().saturating_sub(1)
    }
}

/// Result of [`NodeStore::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// Never-used slot past the previous high-water mark.
    Fresh(u32),
    /// Deleted slot taken from the free pool.
    Reused(u32),
}

impl Allocation {
    pub fn id(&self) -> u32 {
        match *self {
            Allocation::Fresh(id) | Allocation::Reused(id) => id,
        }
    }
}

#[derive(Debug, Default)]
struct SlotAllocator {
    /// High-water mark: ids `0..count` are in use (live or deleted).
    count: usize,
    /// Deleted ids eligible for reuse, most recent last.
    free: Vec<u32>,
}

/// Arena of [`Slot`]s addressed by dense internal id.
#[derive(Debug)]
pub struct NodeStore {
    dimension: usize,
    slots: Vec<Slot>,
    alloc: Mutex<SlotAllocator>,
    deleted_count: AtomicUsize,
}

impl NodeStore {
    pub fn new(dimension: usize, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            dimension,
            slots,
            alloc: Mutex::new(SlotAllocator::default()),
            deleted_count: AtomicUsize::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use, deleted ones included.
    pub fn len(&self) -> usize {
        self.alloc.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_count.load(Ordering::Acquire)
    }

    pub fn free_slots(&self) -> usize {
        self.alloc.lock().free.len()
    }

    /// Reserve a slot. With `reuse`, the most recently freed slot is preferred;
    /// otherwise the next never-used slot is taken.
    pub fn allocate(&self, reuse: bool) -> Result<Allocation> {
        let mut alloc = self.alloc.lock();
        if reuse {
            if let Some(id) = alloc.free.pop() {
                return Ok(Allocation::Reused(id));
            }
        }
        if alloc.count >= self.slots.len() {
            return Err(IndexError::CapacityExceeded {
                capacity: self.slots.len(),
            });
        }
        let id = alloc.count as u32;
        alloc.count += 1;
        Ok(Allocation::Fresh(id))
    }

    /// Offer a deleted slot for reuse.
    pub fn release(&self, id: u32) {
        let mut alloc = self.alloc.lock();
        if !alloc.free.contains(&id) {
            alloc.free.push(id);
        }
    }

    /// Withdraw `id` from the free pool. Returns `true` if it was pooled.
    pub fn withdraw(&self, id: u32) -> bool {
        let mut alloc = self.alloc.lock();
        match alloc.free.iter().position(|&f| f == id) {
            Some(pos) => {
                alloc.free.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Write a freshly allocated slot. The slot must not be reachable yet.
    pub fn init_slot(&self, id: u32, label: u64, vector: Vec<f32>, level: usize) {
        let slot = &self.slots[id as usize];
        *slot.vector.write() = vector;
        *slot.links.write() = vec![Vec::new(); level + 1];
        slot.level.store(level as u8, Ordering::Release);
        slot.label.store(label, Ordering::Release);
        slot.deleted.store(false, Ordering::Release);
        slot.dirty.store(true, Ordering::Release);
    }

    /// Replace the vector and label of a slot that stays linked in the graph.
    /// The level and neighbor lists are kept until the caller relinks the node.
    pub fn overwrite(&self, id: u32, label: u64, vector: Vec<f32>) {
        let slot = &self.slots[id as usize];
        *slot.vector.write() = vector;
        slot.label.store(label, Ordering::Release);
        slot.dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn label(&self, id: u32) -> u64 {
        self.slots[id as usize].label.load(Ordering::Acquire)
    }

    #[inline]
    pub fn level(&self, id: u32) -> usize {
        self.slots[id as usize].level.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.slots[id as usize].deleted.load(Ordering::Acquire)
    }

    /// Set the deletion bit. Returns `true` if it was newly set.
    pub fn mark_deleted(&self, id: u32) -> bool {
        let slot = &self.slots[id as usize];
        let was = slot.deleted.swap(true, Ordering::AcqRel);
        if !was {
            self.deleted_count.fetch_add(1, Ordering::AcqRel);
            slot.dirty.store(true, Ordering::Release);
        }
        !was
    }

    /// Clear the deletion bit. Returns `true` if it was set.
    pub fn unmark_deleted(&self, id: u32) -> bool {
        let slot = &self.slots[id as usize];
        let was = slot.deleted.swap(false, Ordering::AcqRel);
        if was {
            self.deleted_count.fetch_sub(1, Ordering::AcqRel);
            slot.dirty.store(true, Ordering::Release);
        }
        was
    }

    /// Owned copy of the stored vector.
    pub fn vector(&self, id: u32) -> Vec<f32> {
        self.slots[id as usize].vector.read().clone()
    }

    /// Distance from `query` to the vector stored at `id`.
    #[inline]
    pub fn distance_to(&self, space: Space, query: &[f32], id: u32) -> f32 {
        let v = self.slots[id as usize].vector.read();
        space.distance(query, &v)
    }

    /// Distance between two stored vectors.
    pub fn distance_between(&self, space: Space, a: u32, b: u32) -> f32 {
        let va = self.slots[a as usize].vector.read();
        if a == b {
            return space.distance(&va, &va);
        }
        // A plain read would queue behind a pending writer on `b` while `a` is held
        let vb = self.slots[b as usize].vector.read_recursive();
        space.distance(&va, &vb)
    }

    /// Copy the neighbor list of `id` at `layer` into `out`.
    /// `out` is left empty if the node does not reach that layer.
    #[inline]
    pub fn copy_neighbors(&self, id: u32, layer: usize, out: &mut Vec<u32>) {
        out.clear();
        let links = self.slots[id as usize].links.read();
        if let Some(list) = links.get(layer) {
            out.extend_from_slice(list);
        }
    }

    pub fn neighbors(&self, id: u32, layer: usize) -> Vec<u32> {
        let mut out = Vec::new();
        self.copy_neighbors(id, layer, &mut out);
        out
    }

    /// Atomically replace the neighbor list of `id` at `layer`.
    pub fn set_neighbors(&self, id: u32, layer: usize, ids: Vec<u32>) {
        let slot = &self.slots[id as usize];
        let mut links = slot.links.write();
        if layer < links.len() {
            links[layer] = ids;
            slot.dirty.store(true, Ordering::Release);
        }
    }

    /// Run `f` on the neighbor list of `id` at `layer` under its write lock.
    /// `f` returns the replacement list, or `None` to leave it untouched.
    pub fn update_neighbors<F>(&self, id: u32, layer: usize, f: F)
    where
        F: FnOnce(&[u32]) -> Option<Vec<u32>>,
    {
        let slot = &self.slots[id as usize];
        let mut links = slot.links.write();
        let Some(current) = links.get(layer) else {
            return;
        };
        if let Some(replacement) = f(current) {
            links[layer] = replacement;
            slot.dirty.store(true, Ordering::Release);
        }
    }

    pub fn snapshot(&self, id: u32) -> NodeSnapshot {
        let slot = &self.slots[id as usize];
        NodeSnapshot {
            label: slot.label.load(Ordering::Acquire),
            deleted: slot.deleted.load(Ordering::Acquire),
            vector: slot.vector.read().clone(),
            links: slot.links.read().clone(),
        }
    }

    pub fn is_dirty(&self, id: u32) -> bool {
        self.slots[id as usize].dirty.load(Ordering::Acquire)
    }

    /// Ids whose persisted record is stale, clearing their dirty bits.
    pub fn take_dirty(&self) -> Vec<u32> {
        let count = self.len();
        (0..count as u32)
            .filter(|&id| self.slots[id as usize].dirty.swap(false, Ordering::AcqRel))
            .collect()
    }

    /// Re-flag ids whose write failed so the next persist retries them.
    pub fn mark_dirty(&self, ids: &[u32]) {
        for &id in ids {
            self.slots[id as usize].dirty.store(true, Ordering::Release);
        }
    }

    pub fn clear_dirty(&self) {
        for slot in &self.slots {
            slot.dirty.store(false, Ordering::Release);
        }
    }

    /// Grow or shrink the arena. Every id below the high-water mark keeps its data.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        let count = self.alloc.get_mut().count;
        if new_capacity < count {
            return Err(IndexError::InvalidCapacity {
                requested: new_capacity,
                current: count,
            });
        }
        self.slots.resize_with(new_capacity, Slot::default);
        Ok(())
    }

    /// Install a persisted node. Used while loading, before the store is shared.
    pub fn restore(&mut self, id: u32, node: NodeSnapshot) {
        let slot = &mut self.slots[id as usize];
        slot.level = AtomicU8::new(node.level() as u8);
        slot.label = AtomicU64::new(node.label);
        slot.deleted = AtomicBool::new(node.deleted);
        slot.dirty = AtomicBool::new(false);
        *slot.vector.get_mut() = node.vector;
        *slot.links.get_mut() = node.links;
        let alloc = self.alloc.get_mut();
        alloc.count = alloc.count.max(id as usize + 1);
        if node.deleted {
            self.deleted_count.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_full() {
        let store = NodeStore::new(2, 2);
        assert_eq!(store.allocate(false).unwrap(), Allocation::Fresh(0));
        assert_eq!(store.allocate(false).unwrap(), Allocation::Fresh(1));
        assert!(matches!(
            store.allocate(false),
            Err(IndexError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reuse_prefers_most_recent_free_slot() {
        let store = NodeStore::new(2, 4);
        for _ in 0..3 {
            store.allocate(false).unwrap();
        }
        store.mark_deleted(0);
        store.release(0);
        store.mark_deleted(2);
        store.release(2);
        assert_eq!(store.allocate(true).unwrap(), Allocation::Reused(2));
        // Without reuse the pool is ignored
        assert_eq!(store.allocate(false).unwrap(), Allocation::Fresh(3));
        assert_eq!(store.allocate(true).unwrap(), Allocation::Reused(0));
        assert!(store.allocate(true).is_err());
    }

    #[test]
    fn test_withdraw_from_pool() {
        let store = NodeStore::new(2, 4);
        store.allocate(false).unwrap();
        store.release(0);
        assert_eq!(store.free_slots(), 1);
        assert!(store.withdraw(0));
        assert!(!store.withdraw(0));
        assert_eq!(store.free_slots(), 0);
    }

    #[test]
    fn test_init_and_neighbors() {
        let store = NodeStore::new(2, 4);
        let id = store.allocate(false).unwrap().id();
        store.init_slot(id, 42, vec![1.0, 2.0], 2);
        assert_eq!(store.label(id), 42);
        assert_eq!(store.level(id), 2);
        assert_eq!(store.vector(id), vec![1.0, 2.0]);
        store.set_neighbors(id, 1, vec![3, 4]);
        assert_eq!(store.neighbors(id, 1), vec![3, 4]);
        // Layer above the node's level is ignored
        store.set_neighbors(id, 5, vec![9]);
        assert!(store.neighbors(id, 5).is_empty());
    }

    #[test]
    fn test_delete_marks_are_counted_once() {
        let store = NodeStore::new(1, 2);
        let id = store.allocate(false).unwrap().id();
        store.init_slot(id, 1, vec![0.0], 0);
        assert!(store.mark_deleted(id));
        assert!(!store.mark_deleted(id));
        assert_eq!(store.deleted_count(), 1);
        assert!(store.unmark_deleted(id));
        assert!(!store.unmark_deleted(id));
        assert_eq!(store.deleted_count(), 0);
    }

    #[test]
    fn test_distance_between_passes_queued_writer() {
        let store = NodeStore::new(1, 2);
        for label in 0..2u64 {
            let id = store.allocate(false).unwrap().id();
            store.init_slot(id, label, vec![label as f32 * 3.0], 0);
        }
        std::thread::scope(|s| {
            let held = store.slots[1].vector.read();
            let writer = s.spawn(|| store.overwrite(1, 1, vec![4.0]));
            std::thread::sleep(std::time::Duration::from_millis(50));
            // Second read of node 1 must not wait for the queued overwrite
            assert_eq!(store.distance_between(Space::L2, 0, 1), 9.0);
            drop(held);
            writer.join().unwrap();
        });
        assert_eq!(store.distance_between(Space::L2, 0, 1), 16.0);
    }

    #[test]
    fn test_dirty_tracking() {
        let store = NodeStore::new(1, 4);
        for label in 0..3 {
            let id = store.allocate(false).unwrap().id();
            store.init_slot(id, label, vec![label as f32], 0);
        }
        assert_eq!(store.take_dirty(), vec![0, 1, 2]);
        assert!(store.take_dirty().is_empty());
        store.mark_deleted(1);
        assert_eq!(store.take_dirty(), vec![1]);
    }

    #[test]
    fn test_resize_preserves_data() {
        let mut store = NodeStore::new(3, 2);
        let id = store.allocate(false).unwrap().id();
        store.init_slot(id, 7, vec![1.5, -2.0, 3.25], 0);
        store.allocate(false).unwrap();
        assert!(matches!(
            store.resize(1),
            Err(IndexError::InvalidCapacity {
                requested: 1,
                current: 2
            })
        ));
        store.resize(10).unwrap();
        assert_eq!(store.capacity(), 10);
        assert_eq!(store.vector(0), vec![1.5, -2.0, 3.25]);
        assert_eq!(store.label(0), 7);
    }

    #[test]
    fn test_restore_sets_counts() {
        let mut store = NodeStore::new(1, 4);
        store.restore(
            2,
            NodeSnapshot {
                label: 9,
                deleted: true,
                vector: vec![1.0],
                links: vec![vec![0], vec![]],
            },
        );
        assert_eq!(store.len(), 3);
        assert_eq!(store.deleted_count(), 1);
        assert_eq!(store.level(2), 1);
        assert!(!store.is_dirty(2));
    }
}
