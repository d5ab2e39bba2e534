//! Append-only deposit log.
//!
//! The log is the deposit record store and, at the same time, the
//! notification channel: appending a record is how a deposit is announced,
//! and replaying from an offset is the only way off-path consumers read
//! deposit history. Replays may overlap (at-least-once), so consumers
//! dedupe by `DepositRecord::sequence`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::{short_hex, DepositDraft, DepositRecord};

/// Errors from deposit log backends
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt log entry at line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode log entry: {0}")]
    Encode(serde_json::Error),
}

/// Read side of the deposit log: what off-path consumers get to see.
pub trait DepositSource: Send + Sync {
    /// All records with `sequence >= offset`, in sequence order.
    fn replay(&self, offset: u64) -> Result<Vec<DepositRecord>, LogError>;

    /// Number of records appended so far (also the next sequence number).
    fn len(&self) -> Result<u64, LogError>;

    fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }
}

/// Durable, replayable store of deposit records.
pub trait DepositLog: DepositSource {
    /// Append a deposit, assigning it the next sequence number.
    fn append(&self, draft: DepositDraft) -> Result<DepositRecord, LogError>;
}

/// Replay-only handle on a deposit log. Cannot append.
#[derive(Clone)]
pub struct LogReader {
    log: Arc<dyn DepositLog>,
}

impl LogReader {
    pub fn new(log: Arc<dyn DepositLog>) -> Self {
        Self { log }
    }
}

impl DepositSource for LogReader {
    fn replay(&self, offset: u64) -> Result<Vec<DepositRecord>, LogError> {
        self.log.replay(offset)
    }

    fn len(&self) -> Result<u64, LogError> {
        self.log.len()
    }
}

impl fmt::Debug for LogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReader").finish_non_exhaustive()
    }
}

/// In-memory deposit log
#[derive(Debug, Default)]
pub struct MemoryDepositLog {
    records: RwLock<Vec<DepositRecord>>,
}

impl MemoryDepositLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DepositSource for MemoryDepositLog {
    fn replay(&self, offset: u64) -> Result<Vec<DepositRecord>, LogError> {
        let records = self.records.read();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(records.len());
        Ok(records[start..].to_vec())
    }

    fn len(&self) -> Result<u64, LogError> {
        Ok(self.records.read().len() as u64)
    }
}

impl DepositLog for MemoryDepositLog {
    fn append(&self, draft: DepositDraft) -> Result<DepositRecord, LogError> {
        let mut records = self.records.write();
        let record = DepositRecord::from_draft(records.len() as u64, draft);
        records.push(record);
        debug!(
            "Appended deposit #{} for {} (epoch {})",
            record.sequence,
            short_hex(&record.recipient),
            record.epoch,
        );
        Ok(record)
    }
}

/// JSON-lines deposit log: one record per line, appended in place.
///
/// Holds no state besides the path. Every append takes an exclusive lock on
/// the file and derives the next sequence from what is on disk, so several
/// handles or processes sharing one file never hand out the same sequence.
/// Replays take a shared lock.
///
/// A final line without its newline is a write that was cut short. Replays
/// skip it and the next append truncates it away.
#[derive(Debug)]
pub struct JsonlDepositLog {
    path: PathBuf,
}

impl JsonlDepositLog {
    /// Open (or create) a log file. Fails if a complete line is corrupt.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        let log = Self { path };
        log.read_shared()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_shared(&self) -> Result<Contents, LogError> {
        let mut file = File::open(&self.path)?;
        FileExt::lock_shared(&file)?;
        let contents = Contents::read(&mut file)?;
        FileExt::unlock(&file)?;

        if contents.torn {
            warn!(
                "Ignoring unterminated last line of {} (interrupted write)",
                self.path.display(),
            );
        }
        Ok(contents)
    }
}

impl DepositSource for JsonlDepositLog {
    fn replay(&self, offset: u64) -> Result<Vec<DepositRecord>, LogError> {
        let mut records = self.read_shared()?.records;
        records.retain(|r| r.sequence >= offset);
        Ok(records)
    }

    fn len(&self) -> Result<u64, LogError> {
        Ok(self.read_shared()?.next_sequence())
    }
}

impl DepositLog for JsonlDepositLog {
    fn append(&self, draft: DepositDraft) -> Result<DepositRecord, LogError> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        FileExt::lock_exclusive(&file)?;

        let contents = Contents::read(&mut file)?;
        if contents.torn {
            warn!(
                "Truncating unterminated last line of {} at byte {}",
                self.path.display(),
                contents.valid_len,
            );
            file.set_len(contents.valid_len)?;
        }

        let record = DepositRecord::from_draft(contents.next_sequence(), draft);
        let mut line = serde_json::to_string(&record).map_err(LogError::Encode)?;
        line.push('\n');

        file.seek(SeekFrom::Start(contents.valid_len))?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        FileExt::unlock(&file)?;

        debug!(
            "Appended deposit #{} to {}",
            record.sequence,
            self.path.display(),
        );
        Ok(record)
    }
}

/// Parsed log file, read under a lock
struct Contents {
    records: Vec<DepositRecord>,
    /// Byte length up to and including the last newline
    valid_len: u64,
    /// Bytes follow the last newline
    torn: bool,
}

impl Contents {
    fn read(file: &mut File) -> Result<Self, LogError> {
        let mut raw = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut raw)?;

        let valid = raw.rfind('\n').map_or(0, |i| i + 1);
        let torn = valid < raw.len();

        let mut records = Vec::new();
        for (idx, line) in raw[..valid].lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: DepositRecord = serde_json::from_str(line)
                .map_err(|source| LogError::Decode { line: idx + 1, source })?;
            records.push(record);
        }

        Ok(Self {
            records,
            valid_len: valid as u64,
            torn,
        })
    }

    fn next_sequence(&self) -> u64 {
        self.records.last().map_or(0, |r| r.sequence + 1)
    }
}
