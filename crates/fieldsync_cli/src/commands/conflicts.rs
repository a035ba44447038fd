//! Conflicts command implementation.

use super::{open_snapshot, preview, print_json, CliResult, Format};
use fieldsync_protocol::{ConflictDto, ConflictStatus, DeviceId};
use std::path::Path;

/// Runs the conflicts command.
pub fn run(
    path: &Path,
    device: Option<DeviceId>,
    status: Option<ConflictStatus>,
    format: Format,
) -> CliResult<()> {
    let engine = open_snapshot(path)?;
    let conflicts = engine.get_conflicts(device, status);

    match format {
        Format::Json => print_json(&conflicts)?,
        Format::Text => print_text_output(&conflicts),
    }
    Ok(())
}

fn print_text_output(conflicts: &[ConflictDto]) {
    if conflicts.is_empty() {
        println!("No conflicts");
        return;
    }

    for conflict in conflicts {
        println!(
            "{} [{}] {}/{} client {} vs server {}",
            conflict.id,
            conflict.status,
            conflict.entity_type,
            conflict.entity_id,
            conflict.client_version,
            conflict.server_version,
        );
        println!("    device:   {}", conflict.device_id);
        println!("    detected: {}", conflict.detected_at.to_rfc3339());
        println!("    client:   {}", preview(conflict.client_payload.as_bytes()));
        println!("    server:   {}", preview(conflict.server_payload.as_bytes()));
        if let Some(resolved) = &conflict.resolved_payload {
            println!("    resolved: {}", preview(resolved.as_bytes()));
        }
    }
    println!();
    println!("{} conflict(s)", conflicts.len());
}
