//! Inspect command implementation.

use super::{open_snapshot, print_json, CliResult, Format};
use fieldsync_core::EngineStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Complete journal records.
    pub records: usize,
    /// Bytes of a torn trailing record.
    pub torn_bytes: u64,
    /// Record count per kind.
    pub records_by_kind: BTreeMap<String, usize>,
    /// Engine state rebuilt from the journal.
    pub engine: EngineStats,
}

/// Collects statistics for the journal at `path`.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let engine = open_snapshot(path)?;
    let journal = engine.journal_stats()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        records: journal.records,
        torn_bytes: journal.torn_bytes,
        records_by_kind: journal.by_kind,
        engine: engine.stats(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let result = inspect(path)?;

    match format {
        Format::Json => print_json(&result)?,
        Format::Text => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Fieldsync Journal Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:       {}", format_size(result.journal_size));
    println!("  Records:    {}", result.records);
    for (kind, count) in &result.records_by_kind {
        println!("    {kind:<18} {count}");
    }
    if result.torn_bytes > 0 {
        println!("  Torn tail:  {} bytes", result.torn_bytes);
    }
    println!();
    println!("Engine:");
    println!("  Entities:           {}", result.engine.entities);
    println!("  Batches:            {}", result.engine.batches);
    println!("  Pending batches:    {}", result.engine.pending_batches);
    println!("  Failed batches:     {}", result.engine.failed_batches);
    println!("  Open conflicts:     {}", result.engine.open_conflicts);
    println!("  Resolved conflicts: {}", result.engine.resolved_conflicts);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::write_journal;
    use tempfile::tempdir;

    #[test]
    fn counts_batches_and_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.fsj");
        write_journal(&path);

        let result = inspect(&path).unwrap();

        assert_eq!(result.records, 4);
        assert_eq!(result.records_by_kind["batch-submitted"], 2);
        assert_eq!(result.records_by_kind["batch-processed"], 2);
        assert_eq!(result.engine.entities, 1);
        assert_eq!(result.engine.open_conflicts, 1);
        assert_eq!(result.torn_bytes, 0);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
