//! Journal record types and framing.

use crate::batch::SyncBatch;
use crate::conflict::ConflictRecord;
use crate::error::{CoreError, CoreResult};
use crate::version_store::EntityVersionRecord;
use chrono::{DateTime, Utc};
use fieldsync_protocol::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Magic bytes opening every journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FSJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing CRC32.
pub const CRC_SIZE: usize = 4;

/// Which unit of work produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommitKind {
    /// A new `Pending` batch.
    BatchSubmitted = 1,
    /// Version writes plus the batch's processed state.
    BatchProcessed = 2,
    /// A batch moved to `Failed`.
    BatchFailed = 3,
    /// A conflict resolution, with its version write if any.
    ConflictResolved = 4,
}

impl CommitKind {
    /// Converts a byte to a kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::BatchSubmitted),
            2 => Some(Self::BatchProcessed),
            3 => Some(Self::BatchFailed),
            4 => Some(Self::ConflictResolved),
            _ => None,
        }
    }

    /// Converts the kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for CommitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommitKind::BatchSubmitted => "batch-submitted",
            CommitKind::BatchProcessed => "batch-processed",
            CommitKind::BatchFailed => "batch-failed",
            CommitKind::ConflictResolved => "conflict-resolved",
        };
        f.write_str(name)
    }
}

/// How a commit changes the batch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchChange {
    /// Replace (or insert) the whole batch.
    Upsert(SyncBatch),
    /// Replace a single conflict inside its batch.
    ///
    /// Resolutions of different conflicts in one batch may commit in any
    /// order without overwriting each other.
    ResolveConflict {
        /// Owning batch.
        batch_id: Uuid,
        /// The conflict in its resolved state.
        conflict: ConflictRecord,
    },
}

impl BatchChange {
    /// The batch this change touches.
    pub fn batch_id(&self) -> Uuid {
        match self {
            BatchChange::Upsert(batch) => batch.id(),
            BatchChange::ResolveConflict { batch_id, .. } => *batch_id,
        }
    }
}

/// Everything one unit of work committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Kind of unit of work.
    pub kind: CommitKind,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
    /// Version writes with their commit stamps.
    pub writes: Vec<EntityVersionRecord>,
    /// Effect on the batch table.
    pub change: BatchChange,
}

impl CommitRecord {
    /// Frames the record: header, CBOR payload, CRC32.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = to_cbor(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.kind.as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Result of decoding one frame.
#[derive(Debug)]
pub enum Frame {
    /// A complete, valid record spanning `len` bytes.
    Record {
        /// The record.
        record: CommitRecord,
        /// Framed length.
        len: usize,
    },
    /// The bytes end mid-record.
    Torn,
}

/// Decodes the frame starting at the beginning of `bytes`.
///
/// `offset` is only used to position errors.
pub fn decode_frame(bytes: &[u8], offset: u64) -> CoreResult<Frame> {
    if bytes.len() < HEADER_SIZE {
        return Ok(Frame::Torn);
    }

    if bytes[0..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption(offset, "invalid magic"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > JOURNAL_VERSION {
        return Err(CoreError::journal_corruption(
            offset,
            format!("unsupported version {version}"),
        ));
    }

    let kind_byte = bytes[6];
    let kind = CommitKind::from_byte(kind_byte).ok_or_else(|| {
        CoreError::journal_corruption(offset, format!("unknown record kind {kind_byte}"))
    })?;

    let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if bytes.len() < total {
        return Ok(Frame::Torn);
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    let computed = compute_crc32(&bytes[..body_end]);
    if stored != computed {
        return Err(CoreError::journal_corruption(
            offset,
            format!("crc mismatch: stored {stored:#010x}, computed {computed:#010x}"),
        ));
    }

    let record: CommitRecord = from_cbor(&bytes[HEADER_SIZE..body_end])
        .map_err(|e| CoreError::journal_corruption(offset, e.to_string()))?;
    if record.kind != kind {
        return Err(CoreError::journal_corruption(
            offset,
            format!("header kind {kind} does not match payload kind {}", record.kind),
        ));
    }

    Ok(Frame::Record { record, len: total })
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
