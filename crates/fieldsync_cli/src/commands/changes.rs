//! Changes command implementation.

use super::{open_snapshot, preview, print_json, CliResult, Format};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{ChangesResponse, DeviceId};
use std::path::Path;

/// Runs the changes command.
pub fn run(
    path: &Path,
    device: Option<DeviceId>,
    since: Option<DateTime<Utc>>,
    limit: usize,
    format: Format,
) -> CliResult<()> {
    let engine = open_snapshot(path)?;
    let device = device.unwrap_or_else(DeviceId::random);
    let page = engine.changes_since(&device, since, limit)?;

    match format {
        Format::Json => print_json(&page)?,
        Format::Text => print_text_output(&page),
    }
    Ok(())
}

fn print_text_output(page: &ChangesResponse) {
    for change in &page.changes {
        println!(
            "{} {:<7} {}/{} {} {}",
            change.timestamp.to_rfc3339(),
            change.operation.to_string(),
            change.entity_type,
            change.entity_id,
            change.version,
            preview(change.payload.as_bytes()),
        );
    }
    println!();
    println!("{} change(s)", page.changes.len());
    println!("next cursor: {}", page.server_timestamp.to_rfc3339());
    if page.has_more {
        println!("more changes available");
    }
}
