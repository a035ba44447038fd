//! Commit journal for durability and recovery.
//!
//! Every unit of work that commits appends exactly one [`CommitRecord`]. On
//! open the journal is replayed in order to rebuild the engine state.
//!
//! ## Record format
//!
//! ```text
//! | magic "FSJR" (4) | version (2) | kind (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery policy
//!
//! - A trailing record cut short by a crash is dropped and the store is
//!   truncated back to the last complete record.
//! - A bad magic, unknown kind, CRC mismatch or undecodable payload is
//!   corruption and fails the open.
//!
//! ## Atomicity
//!
//! If an append or flush fails, the journal truncates back to its previous
//! size before returning the error, so a failed unit of work leaves no bytes
//! behind for the next replay.

mod record;

pub use record::{
    compute_crc32, decode_frame, BatchChange, CommitKind, CommitRecord, Frame, CRC_SIZE,
    HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION,
};

use crate::error::CoreResult;
use fieldsync_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Summary of a journal walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Complete records.
    pub records: usize,
    /// Bytes covered by complete records.
    pub valid_bytes: u64,
    /// Bytes of a torn trailing record, if any.
    pub torn_bytes: u64,
    /// Record count per kind.
    pub by_kind: BTreeMap<String, usize>,
}

impl JournalStats {
    /// Returns true if the journal ends on a record boundary.
    pub fn is_clean(&self) -> bool {
        self.torn_bytes == 0
    }
}

/// Append-only commit journal over a storage backend.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
        }
    }

    /// Appends a record and returns its offset.
    ///
    /// The record is flushed before returning when `sync_on_commit` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, the append or the flush fails. The
    /// journal is truncated back to its previous size in that case.
    pub fn append(&self, record: &CommitRecord) -> CoreResult<u64> {
        let data = record.encode()?;

        let mut backend = self.backend.lock();
        let before = backend.size()?;

        let written = backend.append(&data).and_then(|offset| {
            if self.sync_on_commit {
                backend.flush()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(rollback) = backend.truncate(before) {
                    warn!(
                        error = %rollback,
                        size = before,
                        "failed to roll back journal after a failed append"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Reads every complete record without modifying the journal.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` for invalid records and storage errors
    /// for failed reads.
    pub fn scan(&self) -> CoreResult<(Vec<(u64, CommitRecord)>, JournalStats)> {
        let backend = self.backend.lock();
        let size = backend.size()?;
        let bytes = if size == 0 {
            Vec::new()
        } else {
            backend.read_at(0, size as usize)?
        };
        drop(backend);

        let mut records = Vec::new();
        let mut stats = JournalStats::default();
        let mut offset = 0usize;

        while offset < bytes.len() {
            match decode_frame(&bytes[offset..], offset as u64)? {
                Frame::Record { record, len } => {
                    *stats.by_kind.entry(record.kind.to_string()).or_default() += 1;
                    records.push((offset as u64, record));
                    offset += len;
                }
                Frame::Torn => break,
            }
        }

        stats.records = records.len();
        stats.valid_bytes = offset as u64;
        stats.torn_bytes = size - offset as u64;
        Ok((records, stats))
    }

    /// Reads every complete record and drops a torn trailing record.
    ///
    /// # Errors
    ///
    /// Same as [`Journal::scan`], plus storage errors from the truncation.
    pub fn recover(&self) -> CoreResult<Vec<CommitRecord>> {
        let (records, stats) = self.scan()?;
        if !stats.is_clean() {
            warn!(
                valid_bytes = stats.valid_bytes,
                torn_bytes = stats.torn_bytes,
                "dropping torn record at journal tail"
            );
            let mut backend = self.backend.lock();
            backend.truncate(stats.valid_bytes)?;
            backend.sync()?;
        }
        debug!(records = stats.records, "journal scanned");
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Flushes pending writes.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Current size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
