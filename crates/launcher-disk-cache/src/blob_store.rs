//! One-file-per-key payload storage
//!
//! Each payload lives at `<root>/<key>.json` and is replaced as a whole on
//! every write. Writes go to `<key>.json.tmp` first and are renamed into
//! place, so a failed write never leaves a partial payload behind.

use crate::chunked::read_chunked;
use crate::error::{CacheError, Result};
use crate::journal::validate_key;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PAYLOAD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Write `content` to an open handle, then release it.
///
/// The handle is synced and closed on every path. If the write failed, that
/// error is returned and a release failure is only logged.
pub(crate) fn write_and_release(mut file: File, path: &Path, content: &[u8]) -> Result<()> {
    let written = file.write_all(content).and_then(|()| file.flush());
    let released = file.sync_all();
    drop(file);

    match (written, released) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) => Err(CacheError::io(path, e)),
        (Err(e), Err(release_err)) => {
            warn!(path = ?path, error = %release_err, "Failed to release handle after write error");
            Err(CacheError::io(path, e))
        }
        (Ok(()), Err(release_err)) => Err(CacheError::io(path, release_err)),
    }
}

/// Payload files for one cache directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache directory if it does not exist
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{PAYLOAD_EXTENSION}"))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{key}.{PAYLOAD_EXTENSION}.{TEMP_EXTENSION}"))
    }

    /// Replace the payload for `key`, returning the number of bytes written
    pub fn write(&self, key: &str, content: &[u8]) -> Result<u64> {
        validate_key(key)?;
        let path = self.path_for(key);
        let temp_path = self.temp_path_for(key);

        let file = File::create(&temp_path).map_err(|e| CacheError::io(&temp_path, e))?;
        if let Err(err) = write_and_release(file, &temp_path, content) {
            self.discard(&temp_path);
            return Err(err);
        }
        if let Err(e) = fs::rename(&temp_path, &path) {
            self.discard(&temp_path);
            return Err(CacheError::io(&path, e));
        }

        debug!(key = %key, size = content.len(), "Payload written");
        Ok(content.len() as u64)
    }

    pub fn write_string(&self, key: &str, content: &str) -> Result<u64> {
        self.write(key, content.as_bytes())
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<u64> {
        let content = encode_json(key, value)?;
        self.write(key, &content)
    }

    /// Read the raw payload for `key`.
    ///
    /// A missing file is [`CacheError::NotFound`]; any other failure is
    /// [`CacheError::Io`].
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let path = self.path_for(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()));
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        let content = read_chunked(&mut file).map_err(|e| CacheError::io(&path, e));
        drop(file);
        content
    }

    pub fn read_string(&self, key: &str) -> Result<String> {
        let bytes = self.read(key)?;
        String::from_utf8(bytes).map_err(|e| CacheError::decode(key, e))
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.read(key)?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::decode(key, e))
    }

    /// Delete the payload for `key`; returns false if there was none
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "Payload removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Size in bytes of the stored payload
    pub fn size_of(&self, key: &str) -> Result<u64> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Keys of every payload file currently in the directory
    pub fn stored_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for name in self.file_names()? {
            if let Some(key) = name.strip_suffix(&format!(".{PAYLOAD_EXTENSION}")) {
                if validate_key(key).is_ok() {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Delete temporary files left behind by interrupted writes
    pub fn sweep_temp_files(&self) -> Result<usize> {
        let suffix = format!(".{PAYLOAD_EXTENSION}.{TEMP_EXTENSION}");
        let mut removed = 0;
        for name in self.file_names()? {
            if name.ends_with(&suffix) {
                self.discard(&self.root.join(&name));
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Swept leftover temporary payloads");
        }
        Ok(removed)
    }

    fn file_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove temporary payload");
            }
        }
    }
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct AppInfo {
        bundle_name: String,
        label: String,
        icon_id: u32,
    }

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_path_layout() {
        let store = BlobStore::new("/data/cache");
        assert_eq!(
            store.path_for("com.example.clock"),
            PathBuf::from("/data/cache/com.example.clock.json")
        );
    }

    #[test]
    fn test_write_and_read_bytes() {
        let (_dir, store) = store();
        let written = store.write("icon", b"\x89PNG\r\n").unwrap();
        assert_eq!(written, 6);
        assert_eq!(store.read("icon").unwrap(), b"\x89PNG\r\n");
        assert_eq!(store.size_of("icon").unwrap(), 6);
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let (_dir, store) = store();
        store.write_string("label", "a much longer label").unwrap();
        store.write_string("label", "short").unwrap();
        assert_eq!(store.read_string("label").unwrap(), "short");
    }

    #[test]
    fn test_json_round_trip() {
        let (_dir, store) = store();
        let info = AppInfo {
            bundle_name: "com.example.camera".to_string(),
            label: "Camera".to_string(),
            icon_id: 42,
        };
        store.write_json("com.example.camera", &info).unwrap();
        let back: AppInfo = store.read_json("com.example.camera").unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_read_payload_at_chunk_boundaries() {
        let (_dir, store) = store();
        let exact = vec![b'a'; 4096];
        let spill = vec![b'b'; 4097];
        store.write("exact", &exact).unwrap();
        store.write("spill", &spill).unwrap();
        assert_eq!(store.read("exact").unwrap(), exact);
        assert_eq!(store.read("spill").unwrap(), spill);
    }

    #[test]
    fn test_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.read("absent").unwrap_err();
        assert!(err.is_not_found());
        let err = store.read_json::<AppInfo>("absent").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let (_dir, store) = store();
        store.write_string("broken", "{\"bundle_name\":").unwrap();
        let err = store.read_json::<AppInfo>("broken").unwrap_err();
        assert!(err.is_decode());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let (_dir, store) = store();
        store.write("binary", &[0xff, 0xfe, 0x00]).unwrap();
        assert!(store.read_string("binary").unwrap_err().is_decode());
    }

    #[test]
    fn test_encode_failure_writes_nothing() {
        let (_dir, store) = store();
        let mut bad: BTreeMap<Vec<u8>, u8> = BTreeMap::new();
        bad.insert(vec![1], 1);
        let err = store.write_json("bad", &bad).unwrap_err();
        assert!(matches!(err, CacheError::Encode { .. }));
        assert!(!store.path_for("bad").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        store.write_string("gone", "x").unwrap();
        assert!(store.remove("gone").unwrap());
        assert!(!store.remove("gone").unwrap());
        assert!(store.read("gone").unwrap_err().is_not_found());
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.write("../escape", b"x").unwrap_err(),
            CacheError::InvalidKey(_)
        ));
    }

    #[test]
    fn test_failed_write_keeps_previous_payload() {
        let (_dir, store) = store();
        store.write_string("app", "old").unwrap();
        // A directory squatting on the temp path makes the write fail
        fs::create_dir(store.temp_path_for("app")).unwrap();

        let err = store.write_string("app", "new").unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
        assert_eq!(store.read_string("app").unwrap(), "old");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_error_is_returned_after_release() {
        let path = Path::new("/dev/full");
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();

        let err = write_and_release(file, path, &vec![0u8; 64 * 1024]).unwrap_err();
        match err {
            CacheError::Io { path: err_path, source } => {
                assert_eq!(err_path, PathBuf::from("/dev/full"));
                // ENOSPC from the write, not whatever sync reports on release
                assert_eq!(source.raw_os_error(), Some(28));
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_stored_keys_and_sweep() {
        let (dir, store) = store();
        store.write_string("b", "1").unwrap();
        store.write_string("a", "2").unwrap();
        fs::write(dir.path().join("c.json.tmp"), "partial").unwrap();
        fs::write(dir.path().join("journal.txt"), "PUT a\n").unwrap();

        assert_eq!(store.stored_keys().unwrap(), vec!["a", "b"]);
        assert_eq!(store.sweep_temp_files().unwrap(), 1);
        assert!(!dir.path().join("c.json.tmp").exists());
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("not-created"));
        assert!(store.stored_keys().unwrap().is_empty());
        store.ensure_root().unwrap();
        assert!(store.root().is_dir());
    }
}
