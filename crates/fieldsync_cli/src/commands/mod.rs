//! CLI command implementations.

pub mod changes;
pub mod conflicts;
pub mod dump_journal;
pub mod inspect;
pub mod resolve;
pub mod verify;

use clap::ValueEnum;
use fieldsync_core::{Config, CoreError, SyncEngine};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The journal file does not exist.
    #[error("no journal found at {0}")]
    JournalNotFound(PathBuf),

    /// Reading the journal failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The engine rejected the journal or the operation.
    #[error(transparent)]
    Engine(#[from] CoreError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Verification found problems.
    #[error("verification failed")]
    VerificationFailed,
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Reads the whole journal file through a read-only handle.
///
/// Takes no writer lock, so it works while a server holds the journal.
pub fn read_journal(path: &Path) -> CliResult<Vec<u8>> {
    if !path.exists() {
        return Err(CliError::JournalNotFound(path.to_path_buf()));
    }
    let backend = FileBackend::open_read_only(path)?;
    let size = backend.size()?;
    debug!(path = %path.display(), size, "read journal");
    if size == 0 {
        return Ok(Vec::new());
    }
    Ok(backend.read_at(0, size as usize)?)
}

/// Replays a copy of the journal into an in-memory engine.
///
/// The file itself is never modified, even when its tail is torn.
pub fn open_snapshot(path: &Path) -> CliResult<SyncEngine> {
    let bytes = read_journal(path)?;
    let engine = SyncEngine::open(
        Config::default().sync_on_commit(false),
        Box::new(InMemoryBackend::with_data(bytes)),
    )?;
    Ok(engine)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Renders a payload for text output.
pub fn preview(bytes: &[u8]) -> String {
    const MAX: usize = 60;
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().count() > MAX => {
            let cut: String = text.chars().take(MAX).collect();
            format!("{cut}...")
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} bytes>", bytes.len()),
    }
}
