//! Request and response messages for the sync boundary.

use crate::change_feed::ChangesResponse;
use crate::codec::{from_cbor, to_cbor};
use crate::conflict::{ConflictDto, ConflictStatus, ResolutionStrategy};
use crate::error::ProtocolResult;
use crate::types::{BatchStatus, DeltaOperation, DeltaPayload, DeviceId, EntityReference, SyncVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Submit and process a batch.
    ProcessBatchRequest(ProcessBatchRequest),
    /// Outcome of a processed batch.
    ProcessBatchResponse(ProcessBatchResponse),
    /// Resolve one conflict.
    ResolveConflictRequest(ResolveConflictRequest),
    /// Acknowledgement of a resolution.
    ResolveConflictResponse(ResolveConflictResponse),
    /// Pull changes since a cursor.
    ChangesRequest(ChangesRequest),
    /// A page of changes.
    ChangesResponse(ChangesResponse),
    /// List conflicts.
    ConflictsRequest(ConflictsRequest),
    /// Listed conflicts.
    ConflictsResponse(Vec<ConflictDto>),
    /// Look up a batch.
    BatchStatusRequest(BatchStatusRequest),
    /// Status of a batch.
    BatchStatusResponse(BatchStatusResponse),
    /// The request failed.
    Error(ErrorResponse),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::ProcessBatchRequest(_) => 1,
            SyncMessage::ProcessBatchResponse(_) => 2,
            SyncMessage::ResolveConflictRequest(_) => 3,
            SyncMessage::ResolveConflictResponse(_) => 4,
            SyncMessage::ChangesRequest(_) => 5,
            SyncMessage::ChangesResponse(_) => 6,
            SyncMessage::ConflictsRequest(_) => 7,
            SyncMessage::ConflictsResponse(_) => 8,
            SyncMessage::BatchStatusRequest(_) => 9,
            SyncMessage::BatchStatusResponse(_) => 10,
            SyncMessage::Error(_) => 255,
        }
    }

    /// Returns true for messages a client sends.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            SyncMessage::ProcessBatchRequest(_)
                | SyncMessage::ResolveConflictRequest(_)
                | SyncMessage::ChangesRequest(_)
                | SyncMessage::ConflictsRequest(_)
                | SyncMessage::BatchStatusRequest(_)
        )
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// A delta as submitted by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaDto {
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: Uuid,
    /// Kind of change.
    pub operation: DeltaOperation,
    /// Version the device believed was current.
    pub base_version: SyncVersion,
    /// New state of the entity.
    pub payload: DeltaPayload,
    /// When the device made the change.
    pub timestamp: DateTime<Utc>,
}

impl DeltaDto {
    /// Creates a delta stamped with the current time.
    pub fn new(
        entity: EntityReference,
        operation: DeltaOperation,
        base_version: SyncVersion,
        payload: impl Into<DeltaPayload>,
    ) -> Self {
        Self {
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            operation,
            base_version,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    /// The entity this delta targets.
    pub fn entity_ref(&self) -> EntityReference {
        EntityReference::new(self.entity_type.clone(), self.entity_id)
    }
}

/// Submit a batch of deltas for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchRequest {
    /// Submitting device.
    pub device_id: DeviceId,
    /// Deltas in submission order.
    pub deltas: Vec<DeltaDto>,
}

impl ProcessBatchRequest {
    /// Creates a new batch request.
    pub fn new(device_id: DeviceId, deltas: Vec<DeltaDto>) -> Self {
        Self { device_id, deltas }
    }
}

/// Summary of a processed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBatchResponse {
    /// Batch id, usable for later status lookups.
    pub batch_id: Uuid,
    /// Deltas written to the version store.
    pub applied_count: u32,
    /// Deltas that produced conflicts.
    pub conflict_count: u32,
    /// The conflicts, in submission order.
    pub conflicts: Vec<ConflictDto>,
}

impl ProcessBatchResponse {
    /// Returns true if every delta was applied.
    pub fn is_clean(&self) -> bool {
        self.conflict_count == 0
    }
}

/// Resolve a conflict with a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    /// Conflict to resolve.
    pub conflict_id: Uuid,
    /// Strategy to apply.
    pub strategy: ResolutionStrategy,
    /// Required for `ManualMerge`, ignored otherwise.
    #[serde(default)]
    pub merged_payload: Option<DeltaPayload>,
}

impl ResolveConflictRequest {
    /// Creates a request without a merged payload.
    pub fn new(conflict_id: Uuid, strategy: ResolutionStrategy) -> Self {
        Self {
            conflict_id,
            strategy,
            merged_payload: None,
        }
    }

    /// Creates a manual merge request.
    pub fn merge(conflict_id: Uuid, merged_payload: impl Into<DeltaPayload>) -> Self {
        Self {
            conflict_id,
            strategy: ResolutionStrategy::ManualMerge,
            merged_payload: Some(merged_payload.into()),
        }
    }
}

/// Acknowledges a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    /// The resolved conflict.
    pub conflict_id: Uuid,
    /// Version written by the resolution, if any.
    pub written_version: Option<SyncVersion>,
}

/// Pull changes made by other devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesRequest {
    /// Requesting device; its own writes are excluded.
    pub device_id: DeviceId,
    /// Cursor from the previous page, or `None` for everything.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Page size; the server default applies when absent.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ChangesRequest {
    /// Creates a request for everything since `since`.
    pub fn new(device_id: DeviceId, since: Option<DateTime<Utc>>) -> Self {
        Self {
            device_id,
            since,
            limit: None,
        }
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// List conflicts, optionally filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictsRequest {
    /// Only conflicts raised by this device.
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    /// Only conflicts in this status.
    #[serde(default)]
    pub status: Option<ConflictStatus>,
}

/// Look up a batch by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    /// Batch to look up.
    pub batch_id: Uuid,
}

/// Current state of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    /// Batch id.
    pub batch_id: Uuid,
    /// Submitting device.
    pub device_id: DeviceId,
    /// Status, including the transient `Processing`.
    pub status: BatchStatus,
    /// Number of deltas in the batch.
    pub delta_count: u32,
    /// Number of conflicts recorded.
    pub conflict_count: u32,
    /// When the batch was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When processing finished.
    pub processed_at: Option<DateTime<Utc>>,
}

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Short machine-readable kind, e.g. `"rule_violation"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// True if the same call may succeed when retried.
    pub retryable: bool,
}
