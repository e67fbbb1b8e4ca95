//! Generation-stamped visited set for graph traversal.
//!
//! Each `clear()` bumps a generation counter instead of zeroing the array, so
//! one allocation serves every search a thread performs.

use std::cell::RefCell;

/// Visited set over dense internal ids.
///
/// `insert()` compares the stored stamp against the current generation.
/// The stamp array is only zeroed when the `u16` generation wraps.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Forget every visited id.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.stamps.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grow to cover at least `cap` ids. Never shrinks.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.stamps.len() {
            self.stamps.resize(cap, 0);
        }
    }

    /// Mark `id` visited. Returns `true` if it was not visited before.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.stamps[id as usize];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.stamps
            .get(id as usize)
            .is_some_and(|&s| s == self.generation)
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

thread_local! {
    static POOLED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// Run `f` with this thread's pooled visited set, cleared and sized for `capacity` ids.
///
/// Falls back to a fresh set if the pooled one is already borrowed further up
/// the stack.
pub fn with_visited<R>(capacity: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    POOLED.with(|cell| match cell.try_borrow_mut() {
        Ok(mut visited) => {
            visited.ensure_capacity(capacity);
            visited.clear();
            f(&mut visited)
        }
        Err(_) => f(&mut VisitedSet::new(capacity)),
    })
}
