//! In-memory recency index
//!
//! Maps keys to their size and recency rank. Ranks come from a logical clock
//! that advances on every touch, so they are unique and the `order` map
//! yields keys strictly least-recently-used first.

use crate::types::CacheEntry;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy)]
struct Slot {
    rank: u64,
    size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RecencyIndex {
    slots: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    clock: u64,
    total_bytes: u64,
}

impl RecencyIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insert or overwrite `key` as the most recently used entry
    pub(crate) fn insert(&mut self, key: &str, size: u64) -> u64 {
        let rank = self.tick();
        if let Some(old) = self.slots.insert(key.to_string(), Slot { rank, size }) {
            self.order.remove(&old.rank);
            self.total_bytes -= old.size;
        }
        self.order.insert(rank, key.to_string());
        self.total_bytes += size;
        rank
    }

    /// Mark an existing key as most recently used
    pub(crate) fn touch(&mut self, key: &str) -> Option<u64> {
        let old_rank = self.slots.get(key)?.rank;
        let rank = self.tick();
        self.order.remove(&old_rank);
        self.order.insert(rank, key.to_string());
        if let Some(slot) = self.slots.get_mut(key) {
            slot.rank = rank;
        }
        Some(rank)
    }

    /// Correct the recorded size without changing recency
    pub(crate) fn set_size(&mut self, key: &str, size: u64) {
        if let Some(slot) = self.slots.get_mut(key) {
            self.total_bytes = self.total_bytes - slot.size + size;
            slot.size = size;
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.rank);
        self.total_bytes -= slot.size;
        Some(CacheEntry {
            key: key.to_string(),
            size: slot.size,
            last_access: slot.rank,
        })
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Least recently used key
    pub(crate) fn oldest(&self) -> Option<&str> {
        self.order.values().next().map(String::as_str)
    }

    /// Keys from least to most recently used
    pub(crate) fn keys_lru(&self) -> Vec<String> {
        self.order.values().cloned().collect()
    }

    /// Entry snapshots from least to most recently used
    pub(crate) fn entries_lru(&self) -> Vec<CacheEntry> {
        self.order
            .iter()
            .filter_map(|(rank, key)| {
                self.slots.get(key).map(|slot| CacheEntry {
                    key: key.clone(),
                    size: slot.size,
                    last_access: *rank,
                })
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_orders_by_recency() {
        let mut index = RecencyIndex::new();
        index.insert("a", 1);
        index.insert("b", 2);
        index.insert("c", 3);
        assert_eq!(index.keys_lru(), vec!["a", "b", "c"]);
        assert_eq!(index.oldest(), Some("a"));
        assert_eq!(index.total_bytes(), 6);
    }

    #[test]
    fn test_touch_moves_to_most_recent() {
        let mut index = RecencyIndex::new();
        index.insert("a", 1);
        index.insert("b", 1);
        assert!(index.touch("a").is_some());
        assert_eq!(index.keys_lru(), vec!["b", "a"]);
        assert!(index.touch("missing").is_none());
    }

    #[test]
    fn test_overwrite_adjusts_size() {
        let mut index = RecencyIndex::new();
        index.insert("a", 10);
        index.insert("b", 5);
        index.insert("a", 3);
        assert_eq!(index.len(), 2);
        assert_eq!(index.total_bytes(), 8);
        assert_eq!(index.keys_lru(), vec!["b", "a"]);
    }

    #[test]
    fn test_remove_and_ranks_stay_unique() {
        let mut index = RecencyIndex::new();
        let first = index.insert("a", 4);
        let removed = index.remove("a").unwrap();
        assert_eq!(removed.size, 4);
        assert_eq!(removed.last_access, first);
        assert!(index.remove("a").is_none());

        let second = index.insert("a", 4);
        assert!(second > first);
        assert_eq!(index.total_bytes(), 4);
    }

    #[test]
    fn test_set_size_keeps_rank() {
        let mut index = RecencyIndex::new();
        index.insert("a", 0);
        index.insert("b", 0);
        index.set_size("a", 100);
        assert_eq!(index.total_bytes(), 100);
        assert_eq!(index.oldest(), Some("a"));
        let entries = index.entries_lru();
        assert_eq!(entries[0].size, 100);
    }

    #[test]
    fn test_clear() {
        let mut index = RecencyIndex::new();
        index.insert("a", 1);
        index.clear();
        assert_eq!(index.len(), 0);
        assert_eq!(index.total_bytes(), 0);
        assert!(index.oldest().is_none());
    }
}
