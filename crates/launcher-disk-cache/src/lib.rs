//! Journal-backed disk LRU cache
//!
//! Persists derived application metadata (icons, resolved labels, resource
//! blobs) as one payload file per key, with an append-only journal that
//! records every mutation. The in-memory recency index is rebuilt from the
//! journal on startup, so membership and LRU order survive process restarts.
//!
//! Layout of a cache directory:
//!
//! ```text
//! <cache-root>/<key>.json   one payload file per key
//! <cache-root>/journal.txt  newline-delimited operation log
//! ```

pub mod blob_store;
pub mod cache;
pub mod chunked;
pub mod config;
pub mod error;
mod index;
pub mod journal;
pub mod types;

pub use blob_store::BlobStore;
pub use cache::DiskLruCache;
pub use chunked::{read_chunked, READ_CHUNK_SIZE};
pub use config::CacheConfig;
pub use error::{CacheError, DecodeError, Result};
pub use journal::{Journal, JournalOp, JournalRecord};
pub use types::{CacheEntry, CacheState, CacheStats};
