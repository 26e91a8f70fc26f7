//! Cache types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata for a cached payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub size: u64,
    /// Recency rank taken from the logical operation clock, not wall time
    pub last_access: u64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub journal_records: usize,
}

/// Lifecycle of a cache manager instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Uninitialized,
    Ready,
    Cleared,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Ready => "ready",
            CacheState::Cleared => "cleared",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_cache_entry_serialization() {
        let entry = CacheEntry {
            key: "com.example.camera".to_string(),
            size: 12345,
            last_access: 7,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("com.example.camera"));
        assert!(json.contains("12345"));

        let deserialized: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, entry);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&CacheState::Uninitialized).unwrap();
        assert_eq!(json, "\"uninitialized\"");
        assert_eq!(CacheState::Ready.to_string(), "ready");
    }
}
