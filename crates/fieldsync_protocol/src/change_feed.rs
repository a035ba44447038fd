//! Change feed payloads.

use crate::types::{DeltaOperation, DeltaPayload, SyncVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One server-side version advance a device has not seen yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDto {
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: Uuid,
    /// Last operation applied to the entity.
    pub operation: DeltaOperation,
    /// Current version.
    pub version: SyncVersion,
    /// Current payload.
    pub payload: DeltaPayload,
    /// Commit stamp of the version.
    pub timestamp: DateTime<Utc>,
}

/// One page of the change feed.
///
/// `server_timestamp` is the cursor to pass as `since` on the next call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    /// Changes in commit order, oldest first.
    pub changes: Vec<ChangeDto>,
    /// Cursor for the next call.
    pub server_timestamp: DateTime<Utc>,
    /// True if more changes were available than fit in this page.
    pub has_more: bool,
}

impl ChangesResponse {
    /// Returns true if the page carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
