//! Journal-backed ordered store.
//!
//! Every `put` is appended to a single journal file before the in-memory index is
//! updated. On open the journal is replayed front to back; later records for a key win.
//!
//! # Binary format (per record)
//! ```text
//! [body_len: u32 LE]
//! [body:     bincode(LogRecord { key, value })]
//! [checksum: u32 LE]  // CRC32C over body
//! ```
//!
//! A crash in the middle of an append leaves a short or checksum-failing record at the
//! tail. Replay stops there, logs a warning and truncates the file back to the last
//! complete record. An append that fails while the process keeps running is cut back the
//! same way before `put` returns, so later records never sit behind a torn one.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bincode::{Decode, Encode};
use crc32c::crc32c;
use log::{debug, warn};

use crate::error::CacheError;
use crate::store::{Entry, MemoryStore, OrderedStore};

/// Largest record body accepted on replay; anything bigger is treated as corruption.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Encode, Decode)]
struct LogRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl LogRecord {
    fn to_frame(&self) -> Result<Vec<u8>, CacheError> {
        let body = bincode::encode_to_vec(self, bincode::config::standard())?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| CacheError::Store(format!("record too large: {} bytes", body.len())))?;
        let mut frame = Vec::with_capacity(body.len() + 8);
        frame.extend_from_slice(&body_len.to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc32c(&body).to_le_bytes());
        Ok(frame)
    }

    /// Parses one frame from the front of `data`, returning the record and bytes consumed.
    /// `None` means the data does not hold a complete, valid frame.
    fn from_frame(data: &[u8]) -> Option<(LogRecord, usize)> {
        let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        let body_len = u32::from_le_bytes(len_bytes) as usize;
        if body_len > MAX_BODY_LEN {
            return None;
        }
        let body = data.get(4..4 + body_len)?;
        let crc_bytes: [u8; 4] = data.get(4 + body_len..8 + body_len)?.try_into().ok()?;
        if crc32c(body) != u32::from_le_bytes(crc_bytes) {
            return None;
        }
        let config = bincode::config::standard().with_limit::<MAX_BODY_LEN>();
        let (record, _) = bincode::decode_from_slice::<LogRecord, _>(body, config).ok()?;
        Some((record, body_len + 8))
    }
}

/// What an append needs from the journal file.
trait JournalFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl JournalFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// A failed append.
#[derive(Debug)]
enum AppendFailure {
    /// The journal is back at its previous length.
    RolledBack(io::Error),
    /// The journal could not be cut back and may end in a torn record.
    Torn(io::Error),
}

/// Writes and syncs `frame`. On failure the journal is truncated to where it was.
fn append_frame<J: JournalFile>(journal: &mut J, frame: &[u8]) -> Result<(), AppendFailure> {
    let len = journal.size().map_err(AppendFailure::RolledBack)?;
    let Err(e) = journal.write_all(frame).and_then(|_| journal.sync()) else {
        return Ok(());
    };
    match journal.truncate(len).and_then(|_| journal.sync()) {
        Ok(()) => Err(AppendFailure::RolledBack(e)),
        Err(rollback) => {
            warn!("Journal rollback after {} failed: {}", e, rollback);
            Err(AppendFailure::Torn(e))
        }
    }
}

/// Durable ordered store: an in-memory index rebuilt from an append-only journal.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    index: MemoryStore,
    journal: Mutex<File>,
    torn: AtomicBool,
}

impl LogStore {
    /// Name of the journal file inside the store directory.
    pub const JOURNAL_FILE: &'static str = "journal.log";

    /// Open (or create) the store rooted at directory `dir` and replay its journal.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::JOURNAL_FILE);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let index = MemoryStore::new();
        let mut offset = 0usize;
        let mut replayed = 0usize;
        while offset < data.len() {
            match LogRecord::from_frame(&data[offset..]) {
                Some((record, consumed)) => {
                    index.put(&record.key, &record.value)?;
                    offset += consumed;
                    replayed += 1;
                }
                None => {
                    warn!(
                        "Journal {} has a damaged tail at byte {} ({} bytes dropped)",
                        path.display(),
                        offset,
                        data.len() - offset
                    );
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }
        debug!("Replayed {} journal records from {}", replayed, path.display());

        Ok(Self {
            path,
            index,
            journal: Mutex::new(file),
            torn: AtomicBool::new(false),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OrderedStore for LogStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CacheError> {
        self.index.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CacheError> {
        let frame = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
        }
        .to_frame()?;

        // The index is updated under the journal lock so both see puts in the same order.
        let mut journal = self.journal.lock()?;
        if self.torn.load(Ordering::Acquire) {
            return Err(CacheError::Store(String::from(
                "journal ends in a torn record; reopen the store",
            )));
        }
        match append_frame(&mut *journal, &frame) {
            Ok(()) => self.index.put(key, value),
            Err(AppendFailure::RolledBack(e)) => {
                Err(CacheError::Store(format!("journal append failed: {}", e)))
            }
            Err(AppendFailure::Torn(e)) => {
                self.torn.store(true, Ordering::Release);
                Err(CacheError::Store(format!("journal append failed: {}", e)))
            }
        }
    }

    fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<Entry>, CacheError> {
        self.index.scan(lower, upper)
    }
}
