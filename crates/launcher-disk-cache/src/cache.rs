//! Journal-backed LRU cache manager
//!
//! Coordinates the [`BlobStore`] and the [`Journal`]: every mutation is
//! applied to storage first and then recorded, and the in-memory recency
//! index is rebuilt from the journal by [`DiskLruCache::init`].

use crate::blob_store::{encode_json, BlobStore};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::index::RecencyIndex;
use crate::journal::{validate_key, Journal, JournalOp, JournalRecord};
use crate::types::{CacheEntry, CacheState, CacheStats};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// A disk cache with LRU eviction and journal-based recovery
///
/// One instance owns its cache directory. All operations are synchronous and
/// serialized by a single lock held across the index update, the payload I/O
/// and the journal append.
pub struct DiskLruCache {
    config: CacheConfig,
    store: BlobStore,
    journal: Journal,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    state: CacheState,
    index: RecencyIndex,
    /// Records currently in the journal file, as far as this instance knows
    journal_records: usize,
}

fn ensure_ready(inner: &Inner) -> Result<()> {
    match inner.state {
        CacheState::Ready => Ok(()),
        state => Err(CacheError::NotReady(state)),
    }
}

impl DiskLruCache {
    /// Create an uninitialized cache; call [`init`](Self::init) before use
    pub fn new(config: CacheConfig) -> Self {
        let store = BlobStore::new(&config.cache_dir);
        let journal = Journal::in_dir(&config.cache_dir);
        Self {
            config,
            store,
            journal,
            inner: Mutex::new(Inner {
                state: CacheState::Uninitialized,
                index: RecencyIndex::new(),
                journal_records: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create and initialize a cache in one step
    pub fn open(config: CacheConfig) -> Result<Self> {
        let cache = Self::new(config);
        cache.init()?;
        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild the index from the journal and move to [`CacheState::Ready`].
    ///
    /// Also valid after [`clear`](Self::clear). Calling it on a ready cache
    /// does nothing.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == CacheState::Ready {
            return Ok(());
        }

        self.store.ensure_root()?;
        self.store.sweep_temp_files()?;

        let replay = self.journal.replay()?;
        let mut index = RecencyIndex::new();
        for record in &replay.records {
            match record.op {
                JournalOp::Put => {
                    index.insert(&record.key, 0);
                }
                JournalOp::Get => {
                    index.touch(&record.key);
                }
                JournalOp::Remove => {
                    index.remove(&record.key);
                }
            }
        }

        let mut needs_rewrite = replay.is_damaged();
        for key in index.keys_lru() {
            match self.store.size_of(&key) {
                Ok(size) => index.set_size(&key, size),
                Err(err) => {
                    warn!(key = %key, error = %err, "Dropping journal entry without a readable payload");
                    index.remove(&key);
                    needs_rewrite = true;
                }
            }
        }

        if self.config.sweep_orphans {
            self.sweep_orphans(&index)?;
        }

        inner.index = index;
        inner.journal_records = replay.records.len();
        inner.state = CacheState::Ready;

        self.evict_over_capacity(&mut inner)?;
        if needs_rewrite
            || self
                .config
                .should_compact(inner.journal_records, inner.index.len())
        {
            if let Err(err) = self.compact_locked(&mut inner) {
                warn!(error = %err, "Journal rewrite after replay failed");
            }
        }

        info!(
            cache_dir = ?self.config.cache_dir,
            entries = inner.index.len(),
            total_size = inner.index.total_bytes(),
            journal_records = inner.journal_records,
            "Cache initialized"
        );
        Ok(())
    }

    fn sweep_orphans(&self, index: &RecencyIndex) -> Result<()> {
        for key in self.store.stored_keys()? {
            if index.contains(&key) {
                continue;
            }
            match self.store.remove(&key) {
                Ok(_) => debug!(key = %key, "Removed orphaned payload"),
                Err(err) => warn!(key = %key, error = %err, "Failed to remove orphaned payload"),
            }
        }
        Ok(())
    }

    /// Get the raw payload for `key`; failures are logged and reported as a miss
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.degrade_to_miss(key, self.try_get(key))
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.degrade_to_miss(key, self.try_get_string(key))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.degrade_to_miss(key, self.try_get_json(key))
    }

    /// Get the raw payload for `key`.
    ///
    /// `Ok(None)` means the key is not cached. An error means the key was
    /// tracked but could not be read; a missing or corrupt payload is also
    /// dropped from the cache.
    pub fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.lookup(key, |store, key| store.read(key))
    }

    pub fn try_get_string(&self, key: &str) -> Result<Option<String>> {
        self.lookup(key, |store, key| store.read_string(key))
    }

    pub fn try_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.lookup(key, |store, key| store.read_json(key))
    }

    fn degrade_to_miss<T>(&self, key: &str, result: Result<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %key, error = %err, "Cache read failed, reporting miss");
                None
            }
        }
    }

    fn lookup<T>(
        &self,
        key: &str,
        read: impl FnOnce(&BlobStore, &str) -> Result<T>,
    ) -> Result<Option<T>> {
        validate_key(key)?;
        let mut inner = self.lock();
        ensure_ready(&inner)?;

        if !inner.index.contains(key) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
            return Ok(None);
        }

        match read(&self.store, key) {
            Ok(value) => {
                inner.index.touch(key);
                self.record(&mut inner, JournalOp::Get, key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                self.maybe_compact(&mut inner);
                Ok(Some(value))
            }
            Err(err) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if err.is_not_found() || err.is_decode() {
                    warn!(key = %key, error = %err, "Dropping unreadable cache entry");
                    self.drop_entry(&mut inner, key);
                }
                Err(err)
            }
        }
    }

    /// Store a raw payload under `key`, evicting LRU entries if over capacity
    pub fn put(&self, key: &str, payload: &[u8]) -> Result<()> {
        validate_key(key)?;
        let size = payload.len() as u64;
        if let Some(max) = self.config.max_bytes {
            if size > max {
                return Err(CacheError::EntryTooLarge {
                    key: key.to_string(),
                    size,
                    max,
                });
            }
        }

        let mut inner = self.lock();
        ensure_ready(&inner)?;

        // A failed write leaves the index and the journal untouched
        self.store.write(key, payload)?;
        inner.index.insert(key, size);
        self.record(&mut inner, JournalOp::Put, key);
        debug!(key = %key, size, "Cached payload");

        self.evict_over_capacity(&mut inner)?;
        self.maybe_compact(&mut inner);
        Ok(())
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value.as_bytes())
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        validate_key(key)?;
        let payload = encode_json(key, value)?;
        self.put(key, &payload)
    }

    /// Remove `key` from the cache; removing an absent key succeeds
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        ensure_ready(&inner)?;

        if !inner.index.contains(key) {
            debug!(key = %key, "Remove of uncached key");
            return Ok(());
        }

        self.store.remove(key)?;
        inner.index.remove(key);
        self.record(&mut inner, JournalOp::Remove, key);
        debug!(key = %key, "Removed cache entry");
        self.maybe_compact(&mut inner);
        Ok(())
    }

    /// Delete every tracked payload and truncate the journal.
    ///
    /// Moves the cache to [`CacheState::Cleared`]; it must be initialized again
    /// before further use. Every file is attempted even if some deletions
    /// fail, and the first failure is returned.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            CacheState::Ready => {}
            CacheState::Cleared => return Ok(()),
            state => return Err(CacheError::NotReady(state)),
        }

        let keys = inner.index.keys_lru();
        let mut first_error = None;
        for key in &keys {
            if let Err(err) = self.store.remove(key) {
                warn!(key = %key, error = %err, "Failed to delete payload during clear");
                first_error.get_or_insert(err);
            }
        }
        inner.index.clear();

        if let Err(err) = self.journal.truncate() {
            warn!(error = %err, "Failed to truncate journal during clear");
            first_error.get_or_insert(err);
        }
        inner.journal_records = 0;
        inner.state = CacheState::Cleared;

        info!(removed = keys.len(), "Cache cleared");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Rewrite the journal from the live index, one `PUT` per entry in LRU order
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.lock();
        ensure_ready(&inner)?;
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<()> {
        let records: Vec<JournalRecord> = inner
            .index
            .keys_lru()
            .into_iter()
            .map(|key| JournalRecord::new(JournalOp::Put, key))
            .collect();
        let before = inner.journal_records;
        inner.journal_records = self.journal.rewrite(&records)?;
        info!(before, after = inner.journal_records, "Journal compacted");
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut Inner) {
        if !self
            .config
            .should_compact(inner.journal_records, inner.index.len())
        {
            return;
        }
        if let Err(err) = self.compact_locked(inner) {
            warn!(error = %err, "Journal compaction failed");
        }
    }

    /// Append a journal record.
    ///
    /// A failed append is logged and otherwise tolerated: the entry stays
    /// usable for this process and simply will not survive a restart.
    fn record(&self, inner: &mut Inner, op: JournalOp, key: &str) {
        match self.journal.append(op, key) {
            Ok(()) => inner.journal_records += 1,
            Err(err) => {
                warn!(op = %op, key = %key, error = %err, "Failed to append journal record")
            }
        }
    }

    fn over_capacity(&self, index: &RecencyIndex) -> bool {
        index.len() > self.config.entry_limit()
            || self
                .config
                .max_bytes
                .is_some_and(|max| index.total_bytes() > max)
    }

    /// Evict least recently used entries until within capacity
    fn evict_over_capacity(&self, inner: &mut Inner) -> Result<()> {
        while self.over_capacity(&inner.index) {
            let Some(key) = inner.index.oldest().map(str::to_string) else {
                break;
            };
            self.drop_entry(inner, &key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted least recently used entry");
        }

        if self.over_capacity(&inner.index) {
            return Err(CacheError::CapacityViolation {
                entries: inner.index.len(),
                bytes: inner.index.total_bytes(),
            });
        }
        Ok(())
    }

    /// Delete the payload, forget the key and journal the removal.
    ///
    /// A payload that cannot be deleted is left as an orphan for the next
    /// initialization to sweep.
    fn drop_entry(&self, inner: &mut Inner, key: &str) {
        if let Err(err) = self.store.remove(key) {
            warn!(key = %key, error = %err, "Failed to delete payload");
        }
        inner.index.remove(key);
        self.record(inner, JournalOp::Remove, key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().index.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, least recently used first
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock().index.keys_lru()
    }

    /// Metadata snapshot of every entry, least recently used first
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.lock().index.entries_lru()
    }

    pub fn state(&self) -> CacheState {
        self.lock().state
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        self.store.root()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.index.len(),
            total_size: inner.index.total_bytes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            journal_records: inner.journal_records,
        }
    }
}
