//! Dump journal command implementation.

use super::{print_json, read_journal, CliResult, Format};
use fieldsync_core::journal::{decode_frame, BatchChange, CommitRecord, Frame};
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct JournalRecordInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Framed length in bytes.
    pub len: usize,
    /// Record kind.
    pub kind: String,
    /// Commit time (RFC 3339).
    pub committed_at: String,
    /// Batch the record touches.
    pub batch_id: String,
    /// Batch status after the commit (if the whole batch was written).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_status: Option<String>,
    /// Resolved conflict (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    /// Version writes as `type/id@version`.
    pub writes: Vec<String>,
}

impl JournalRecordInfo {
    fn new(offset: u64, len: usize, record: &CommitRecord) -> Self {
        let (batch_status, conflict_id) = match &record.change {
            BatchChange::Upsert(batch) => (Some(batch.status().to_string()), None),
            BatchChange::ResolveConflict { conflict, .. } => (None, Some(conflict.id.to_string())),
        };
        Self {
            offset,
            len,
            kind: record.kind.to_string(),
            committed_at: record.committed_at.to_rfc3339(),
            batch_id: record.change.batch_id().to_string(),
            batch_status,
            conflict_id,
            writes: record
                .writes
                .iter()
                .map(|w| format!("{}@{}", w.entity_ref, w.version))
                .collect(),
        }
    }
}

/// Decodes up to `limit` records from the start of the journal.
///
/// Stops at a torn tail; a corrupt record is an error.
pub fn read_records(path: &Path, limit: Option<usize>) -> CliResult<Vec<JournalRecordInfo>> {
    let bytes = read_journal(path)?;
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() && records.len() < max_records {
        match decode_frame(&bytes[offset..], offset as u64)? {
            Frame::Record { record, len } => {
                records.push(JournalRecordInfo::new(offset as u64, len, &record));
                offset += len;
            }
            Frame::Torn => break,
        }
    }

    Ok(records)
}

/// Runs the dump-journal command.
pub fn run(path: &Path, limit: Option<usize>, format: Format) -> CliResult<()> {
    let records = read_records(path, limit)?;

    match format {
        Format::Json => print_json(&records)?,
        Format::Text => print_text_output(&records),
    }
    Ok(())
}

fn print_text_output(records: &[JournalRecordInfo]) {
    println!("Journal Records");
    println!("===============");
    println!();

    for record in records {
        print!(
            "[{:08x}] {:<18} batch={}",
            record.offset, record.kind, record.batch_id
        );
        if let Some(status) = &record.batch_status {
            print!(" status={status}");
        }
        if let Some(conflict_id) = &record.conflict_id {
            print!(" conflict={conflict_id}");
        }
        println!(" ({} bytes, {})", record.len, record.committed_at);
        for write in &record.writes {
            println!("             write {write}");
        }
    }

    println!();
    println!("Total: {} records", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_journal;
    use tempfile::tempdir;

    #[test]
    fn dumps_records_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.fsj");
        let (entity, _) = write_journal(&path);

        let records = read_records(&path, None).unwrap();

        let kinds: Vec<&str> = records.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(
            kinds,
            [
                "batch-submitted",
                "batch-processed",
                "batch-submitted",
                "batch-processed"
            ]
        );
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, records[0].len as u64);
        assert_eq!(records[1].writes, vec![format!("{entity}@v1")]);
        assert_eq!(records[3].batch_status.as_deref(), Some("partial-conflict"));
        assert!(records[3].writes.is_empty());
    }

    #[test]
    fn limit_caps_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.fsj");
        write_journal(&path);

        assert_eq!(read_records(&path, Some(1)).unwrap().len(), 1);
    }
}
