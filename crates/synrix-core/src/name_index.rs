//! In-memory name index: exact and prefix lookup over live node names.
//!
//! Backed by a `BTreeMap<Vec<u8>, Vec<u64>>` rather than a hash map so
//! that a prefix query is a bounded range scan (`range(prefix..)`) with
//! an early exit on the first non-matching key, the sorted-order option
//! the data model explicitly allows alongside a hash index. Multiple
//! live ids may share one name, so each entry holds a small id list
//! rather than a single id — the same one-to-many shape as the
//! `id -> offset` index in `storage/mmap.rs`, keyed the other direction.

use std::collections::BTreeMap;

/// Maps node names to the ids of every live node with that exact name.
#[derive(Debug, Default)]
pub struct NameIndex {
    by_name: BTreeMap<Vec<u8>, Vec<u64>>,
}

impl NameIndex {
    /// Builds an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` now has `name`.
    pub fn insert(&mut self, name: &[u8], id: u64) {
        let ids = self.by_name.entry(name.to_vec()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Removes the `(name, id)` association, dropping the key entirely
    /// once its id list is empty.
    pub fn remove(&mut self, name: &[u8], id: u64) {
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// Re-keys `id` from `old_name` to `new_name` (used by `update`).
    pub fn rename(&mut self, old_name: &[u8], new_name: &[u8], id: u64) {
        if old_name == new_name {
            return;
        }
        self.remove(old_name, id);
        self.insert(new_name, id);
    }

    /// Returns every id registered under the exact name `name`.
    #[must_use]
    pub fn find_exact(&self, name: &[u8]) -> Vec<u64> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    /// Returns every id whose name starts with `prefix`, in name order,
    /// truncated to `limit` entries (`0` means unlimited).
    #[must_use]
    pub fn find_prefix(&self, prefix: &[u8], limit: usize) -> Vec<u64> {
        let mut out = Vec::new();
        for (name, ids) in self.by_name.range(prefix.to_vec()..) {
            if !name.starts_with(prefix) {
                break;
            }
            for &id in ids {
                out.push(id);
                if limit != 0 && out.len() >= limit {
                    return out;
                }
            }
        }
        out
    }

    /// Total number of distinct names currently indexed.
    #[must_use]
    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}
