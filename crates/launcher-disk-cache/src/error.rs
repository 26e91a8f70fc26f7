//! Error types for the launcher disk cache

use crate::types::CacheState;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Why a payload could not be turned into the shape the caller asked for
#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    Utf8(std::string::FromUtf8Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(err) => write!(f, "invalid JSON: {err}"),
            DecodeError::Utf8(err) => write!(f, "invalid UTF-8: {err}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(err) => Some(err),
            DecodeError::Utf8(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DecodeError::Utf8(err)
    }
}

#[derive(Debug)]
pub enum CacheError {
    /// Open, read, write, rename or delete failed at the OS level
    Io { path: PathBuf, source: io::Error },
    /// Stored bytes did not parse as the expected shape
    Decode { key: String, source: DecodeError },
    /// Payload could not be serialized before writing
    Encode { key: String, source: serde_json::Error },
    /// No payload file exists for the key
    NotFound(String),
    InvalidKey(String),
    EntryTooLarge { key: String, size: u64, max: u64 },
    /// Index exceeded its bounds after eviction; indicates an eviction bug
    CapacityViolation { entries: usize, bytes: u64 },
    NotReady(CacheState),
}

impl CacheError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn decode(key: &str, source: impl Into<DecodeError>) -> Self {
        CacheError::Decode {
            key: key.to_string(),
            source: source.into(),
        }
    }

    /// True when the entry is simply absent, as opposed to unreadable
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    /// True when the entry exists but its content is corrupt
    pub fn is_decode(&self) -> bool {
        matches!(self, CacheError::Decode { .. })
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io { path, source } => write!(f, "IO error on {path:?}: {source}"),
            CacheError::Decode { key, source } => {
                write!(f, "Decode error for '{key}': {source}")
            }
            CacheError::Encode { key, source } => {
                write!(f, "Encode error for '{key}': {source}")
            }
            CacheError::NotFound(key) => write!(f, "Cache entry not found: {key}"),
            CacheError::InvalidKey(key) => write!(f, "Invalid cache key: {key:?}"),
            CacheError::EntryTooLarge { key, size, max } => write!(
                f,
                "Entry '{key}' is {size} bytes, larger than the {max} byte capacity"
            ),
            CacheError::CapacityViolation { entries, bytes } => write!(
                f,
                "Capacity violated after eviction: {entries} entries, {bytes} bytes"
            ),
            CacheError::NotReady(state) => write!(f, "Cache is not ready (state: {state})"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io { source, .. } => Some(source),
            CacheError::Decode { source, .. } => Some(source),
            CacheError::Encode { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
