//! Resolve command implementation.

use super::{CliError, CliResult};
use fieldsync_core::{Config, Resolution, SyncEngine};
use fieldsync_protocol::{DeltaPayload, ResolutionStrategy};
use fieldsync_storage::FileBackend;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Resolves one conflict in the journal at `path`, appending the resolution.
///
/// Needs the journal's writer lock; fails with
/// [`StorageError::Locked`](fieldsync_storage::StorageError::Locked) while a
/// server has it open.
pub fn resolve(
    path: &Path,
    conflict_id: Uuid,
    strategy: ResolutionStrategy,
    merged_payload: Option<String>,
) -> CliResult<Resolution> {
    if !path.exists() {
        return Err(CliError::JournalNotFound(path.to_path_buf()));
    }
    let engine = SyncEngine::open(Config::default(), Box::new(FileBackend::open(path)?))?;
    let resolution =
        engine.resolve_conflict(conflict_id, strategy, merged_payload.map(DeltaPayload::from))?;
    engine.flush()?;
    info!(
        conflict = %conflict_id,
        strategy = %strategy,
        written = ?resolution.written_version,
        "resolved conflict"
    );
    Ok(resolution)
}

/// Runs the resolve command.
pub fn run(
    path: &Path,
    conflict_id: Uuid,
    strategy: ResolutionStrategy,
    merged_payload: Option<String>,
) -> CliResult<()> {
    let resolution = resolve(path, conflict_id, strategy, merged_payload)?;

    println!(
        "Conflict {} resolved ({})",
        resolution.conflict.id, resolution.conflict.status
    );
    match resolution.written_version {
        Some(version) => println!(
            "{}/{} advanced to {}",
            resolution.conflict.entity_type, resolution.conflict.entity_id, version
        ),
        None => println!("stored version kept"),
    }
    Ok(())
}
