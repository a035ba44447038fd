//! Change feed.
//!
//! Devices pull entities advanced by *other* devices, oldest change first.
//! The returned `server_timestamp` is the cursor for the next call:
//! - page truncated: the stamp of the last delivered change, so the next
//!   page resumes right after it
//! - page complete: a fresh stamp, which every later commit exceeds
//!
//! A stable entity is therefore never delivered twice and a concurrent
//! commit is never skipped.

use crate::error::CoreResult;
use crate::rules;
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use fieldsync_protocol::{ChangesResponse, DeviceId};
use tracing::debug;

pub(crate) fn changes_since(
    store: &SyncStore,
    device_id: &DeviceId,
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> CoreResult<ChangesResponse> {
    rules::page_limit_positive(limit)?;
    let state = store.read();

    let mut records = state
        .versions
        .get_changed_since(since, Some(device_id), limit + 1);
    let has_more = records.len() > limit;
    records.truncate(limit);

    let server_timestamp = match records.last() {
        Some(last) if has_more => last.updated_at,
        _ => store.stamps().next(),
    };
    drop(state);

    debug!(
        device_id = %device_id,
        changes = records.len(),
        has_more,
        "served change feed page"
    );

    Ok(ChangesResponse {
        changes: records.iter().map(|r| r.to_change_dto()).collect(),
        server_timestamp,
        has_more,
    })
}
