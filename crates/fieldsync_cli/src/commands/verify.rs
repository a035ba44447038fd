//! Verify command implementation.

use super::{open_snapshot, read_journal, CliError, CliResult};
use fieldsync_core::journal::{decode_frame, Frame};
use std::path::Path;
use tracing::warn;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of valid records.
    pub valid_records: usize,
    /// Bytes of a torn trailing record.
    pub torn_bytes: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks framing and checksums of every record, then replays the journal.
///
/// A torn tail is reported but is not an error: the engine drops it on
/// the next open.
pub fn verify(path: &Path) -> CliResult<VerifyResult> {
    let bytes = read_journal(path)?;
    let mut result = VerifyResult::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_frame(&bytes[offset..], offset as u64) {
            Ok(Frame::Record { len, .. }) => {
                result.valid_records += 1;
                offset += len;
            }
            Ok(Frame::Torn) => {
                result.torn_bytes = (bytes.len() - offset) as u64;
                break;
            }
            // Framing is lost after a bad record.
            Err(err) => {
                warn!(offset, error = %err, "corrupt journal record");
                result.errors.push(err.to_string());
                return Ok(result);
            }
        }
    }

    if let Err(err) = open_snapshot(path) {
        warn!(error = %err, "journal replay failed");
        result.errors.push(format!("replay failed: {err}"));
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying journal at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("  Valid records: {}", result.valid_records);
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail:     {} bytes (dropped on next open)",
            result.torn_bytes
        );
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err(CliError::VerificationFailed)
    }
}
