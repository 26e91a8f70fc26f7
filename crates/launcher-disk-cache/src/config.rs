//! Cache configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Configuration for a [`DiskLruCache`](crate::DiskLruCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the payload files and the journal
    pub cache_dir: PathBuf,
    /// Maximum number of cached entries (at least 1)
    pub max_entries: usize,
    /// Optional bound on the total payload size in bytes
    pub max_bytes: Option<u64>,
    /// Journal size below which compaction never runs
    pub compaction_min_records: usize,
    /// Compact once the journal holds this many records per live entry
    pub compaction_ratio: usize,
    /// Delete untracked payload files during initialization
    pub sweep_orphans: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/launcher"),
            max_entries: 100,
            max_bytes: None,
            compaction_min_records: 64,
            compaction_ratio: 4,
            sweep_orphans: true,
        }
    }
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let cache_dir = lookup("LAUNCHER_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let max_entries = lookup("LAUNCHER_CACHE_MAX_ENTRIES")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_entries);

        let max_bytes = lookup("LAUNCHER_CACHE_MAX_BYTES")
            .and_then(|s| s.parse::<u64>().ok())
            .or(defaults.max_bytes);

        let compaction_ratio = lookup("LAUNCHER_CACHE_COMPACTION_RATIO")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.compaction_ratio);

        Self {
            cache_dir,
            max_entries,
            max_bytes,
            compaction_ratio,
            ..defaults
        }
    }

    /// Whether a journal of `records` lines should be rewritten for `live` entries
    pub(crate) fn should_compact(&self, records: usize, live: usize) -> bool {
        records >= self.compaction_min_records
            && records > live.max(1).saturating_mul(self.compaction_ratio.max(1))
    }

    pub(crate) fn entry_limit(&self) -> usize {
        self.max_entries.max(1)
    }
}
