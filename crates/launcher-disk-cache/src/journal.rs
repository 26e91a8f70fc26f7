//! Append-only mutation journal
//!
//! One record per line, `<OP> <key>`, where `OP` is `PUT`, `GET` or `REMOVE`.
//! Keys never contain whitespace (see [`validate_key`]), so the single space
//! is an unambiguous delimiter. Records are only ever appended; the file is
//! rewritten as a whole only by compaction or truncated by a clear.

use crate::blob_store::write_and_release;
use crate::chunked::read_chunked;
use crate::error::{CacheError, Result};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const JOURNAL_FILE_NAME: &str = "journal.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalOp {
    /// Payload written
    Put,
    /// Payload read; only moves recency
    Get,
    /// Payload deleted or evicted
    Remove,
}

impl JournalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalOp::Put => "PUT",
            JournalOp::Get => "GET",
            JournalOp::Remove => "REMOVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUT" => Some(JournalOp::Put),
            "GET" => Some(JournalOp::Get),
            "REMOVE" => Some(JournalOp::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for JournalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub op: JournalOp,
    pub key: String,
}

impl JournalRecord {
    pub fn new(op: JournalOp, key: impl Into<String>) -> Self {
        Self {
            op,
            key: key.into(),
        }
    }

    /// Parse one journal line (without its trailing newline)
    pub fn parse_line(line: &str) -> Option<Self> {
        let (op, key) = line.split_once(' ')?;
        let op = JournalOp::parse(op)?;
        validate_key(key).ok()?;
        Some(Self::new(op, key))
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.key)
    }
}

/// Result of reading the journal back for replay
#[derive(Debug, Default)]
pub struct JournalReplay {
    pub records: Vec<JournalRecord>,
    /// Lines that did not parse and were ignored
    pub skipped: usize,
    /// The file did not end with a newline (interrupted append)
    pub torn_tail: bool,
}

impl JournalReplay {
    /// Whether the file on disk should be rewritten from a clean state
    pub fn is_damaged(&self) -> bool {
        self.skipped > 0 || self.torn_tail
    }
}

/// Reject keys that would break the file layout or the record format
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '\\');
    if invalid {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// The journal file of one cache directory
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal living at the standard location inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(JOURNAL_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; the handle is released before returning
    pub fn append(&self, op: JournalOp, key: &str) -> Result<()> {
        self.append_record(&JournalRecord::new(op, key))
    }

    pub fn append_record(&self, record: &JournalRecord) -> Result<()> {
        let line = format!("{record}\n");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CacheError::io(&self.path, e))?;
        write_and_release(file, &self.path, line.as_bytes())?;
        debug!(op = %record.op, key = %record.key, "Journal record appended");
        Ok(())
    }

    /// Full raw content of the journal; a missing file reads as empty
    pub fn read_all(&self) -> Result<String> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No journal yet, starting empty");
                return Ok(String::new());
            }
            Err(e) => return Err(CacheError::io(&self.path, e)),
        };
        let bytes = read_chunked(&mut file).map_err(|e| CacheError::io(&self.path, e))?;
        drop(file);

        match String::from_utf8(bytes) {
            Ok(content) => Ok(content),
            Err(e) => {
                warn!(path = ?self.path, "Journal is not valid UTF-8, replacing bad bytes");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }

    /// Read and parse every record in order, skipping malformed lines.
    ///
    /// A final line without its newline is an interrupted append and is never
    /// applied: a truncated key can name a different, live entry.
    pub fn replay(&self) -> Result<JournalReplay> {
        let content = self.read_all()?;
        let mut replay = JournalReplay::default();

        let complete = match content.rfind('\n') {
            Some(pos) => &content[..=pos],
            None => "",
        };
        let tail = &content[complete.len()..];
        if !tail.is_empty() {
            replay.torn_tail = true;
            replay.skipped += 1;
            warn!(tail, "Ignoring unterminated journal line");
        }

        for (line_no, line) in complete.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match JournalRecord::parse_line(line) {
                Some(record) => replay.records.push(record),
                None => {
                    replay.skipped += 1;
                    warn!(line_no = line_no + 1, line, "Skipping malformed journal line");
                }
            }
        }
        Ok(replay)
    }

    /// Replace the whole journal with `records`.
    ///
    /// Written to a temporary file and renamed into place, so a failure part
    /// way through leaves the previous journal untouched.
    pub fn rewrite<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a JournalRecord>,
    {
        let mut content = String::new();
        let mut count = 0;
        for record in records {
            content.push_str(&record.to_string());
            content.push('\n');
            count += 1;
        }

        let temp_path = self.temp_path();
        let file = File::create(&temp_path).map_err(|e| CacheError::io(&temp_path, e))?;
        if let Err(err) = write_and_release(file, &temp_path, content.as_bytes()) {
            discard_temp(&temp_path);
            return Err(err);
        }
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            discard_temp(&temp_path);
            return Err(CacheError::io(&self.path, e));
        }
        debug!(path = ?self.path, records = count, "Journal rewritten");
        Ok(count)
    }

    /// Drop every record; a missing journal is left missing
    pub fn truncate(&self) -> Result<()> {
        match OpenOptions::new().write(true).truncate(true).open(&self.path) {
            Ok(file) => write_and_release(file, &self.path, &[]),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn discard_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove temporary journal");
        }
    }
}
