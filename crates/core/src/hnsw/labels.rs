//! Bidirectional mapping between caller labels and internal ids.

use crate::error::{IndexError, Result};
use std::collections::{HashMap, HashSet};

/// Label ↔ internal id directory.
///
/// Bindings survive soft deletion so a label can be restored. When a slot is
/// handed to another label, the previous label is remembered as retired.
///
/// The retired set is in memory only. It holds at most one entry per label
/// ever evicted, loses an entry when that label is bound again, and starts
/// empty after a reload.
#[derive(Debug, Default)]
pub struct LabelDirectory {
    forward: HashMap<u64, u32>,
    reverse: HashMap<u32, u64>,
    retired: HashSet<u64>,
}

impl LabelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `label` to `id`, evicting whatever label previously owned `id`.
    /// Returns the evicted label, which becomes retired.
    pub fn bind(&mut self, label: u64, id: u32) -> Option<u64> {
        if let Some(old_id) = self.forward.insert(label, id) {
            if old_id != id {
                self.reverse.remove(&old_id);
            }
        }
        self.retired.remove(&label);
        let evicted = self.reverse.insert(id, label).filter(|&prev| prev != label);
        if let Some(prev) = evicted {
            self.forward.remove(&prev);
            self.retired.insert(prev);
        }
        evicted
    }

    /// Remove the binding of `label`. Returns the id it pointed to.
    pub fn unbind(&mut self, label: u64) -> Option<u32> {
        let id = self.forward.remove(&label)?;
        self.reverse.remove(&id);
        Some(id)
    }

    pub fn lookup(&self, label: u64) -> Result<u32> {
        self.forward
            .get(&label)
            .copied()
            .ok_or(IndexError::NotFound(label))
    }

    pub fn reverse(&self, id: u32) -> Option<u64> {
        self.reverse.get(&id).copied()
    }

    /// Whether `label` lost its slot to another label.
    pub fn is_retired(&self, label: u64) -> bool {
        self.retired.contains(&label)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
