//! The sync batch aggregate.
//!
//! A [`SyncBatch`] is one device's submission. It exclusively owns its deltas
//! and the conflicts they raised, and is kept forever as an audit trail.
//!
//! ```text
//! Pending --process--> Completed | PartialConflict
//! Pending --unrecoverable error--> Failed
//! ```
//!
//! Every mutation appends a [`SyncEvent`] to the aggregate. The events are
//! drained by the unit of work and published only after commit.

use crate::conflict::ConflictRecord;
use crate::error::{CoreError, CoreResult};
use crate::events::SyncEvent;
use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    BatchStatus, DeltaDto, DeltaOperation, DeltaPayload, DeviceId, EntityReference,
    ResolutionStrategy, SyncVersion,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One proposed change to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    /// Delta id.
    pub id: Uuid,
    /// Target entity.
    pub entity_ref: EntityReference,
    /// Kind of change.
    pub operation: DeltaOperation,
    /// Version the device believed was current.
    pub base_version: SyncVersion,
    /// Version written on apply, or the version that caused the conflict.
    pub server_version: Option<SyncVersion>,
    /// New state of the entity.
    pub payload: DeltaPayload,
    /// When the device made the change.
    pub timestamp: DateTime<Utc>,
}

impl SyncDelta {
    /// Creates an unprocessed delta.
    pub fn new(
        entity_ref: EntityReference,
        operation: DeltaOperation,
        base_version: SyncVersion,
        payload: DeltaPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_ref,
            operation,
            base_version,
            server_version: None,
            payload,
            timestamp,
        }
    }

    /// Builds a delta from its boundary form.
    pub fn from_dto(dto: DeltaDto) -> Self {
        let entity_ref = dto.entity_ref();
        Self::new(
            entity_ref,
            dto.operation,
            dto.base_version,
            dto.payload,
            dto.timestamp,
        )
    }

    /// Returns true once the processor has looked at this delta.
    pub fn is_processed(&self) -> bool {
        self.server_version.is_some()
    }
}

/// A device's sync submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    id: Uuid,
    device_id: DeviceId,
    status: BatchStatus,
    deltas: Vec<SyncDelta>,
    conflicts: Vec<ConflictRecord>,
    submitted_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    failure: Option<String>,
    #[serde(skip)]
    events: Vec<SyncEvent>,
}

impl SyncBatch {
    /// Creates a `Pending` batch.
    pub fn submit(device_id: DeviceId, deltas: Vec<SyncDelta>, submitted_at: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        let events = vec![SyncEvent::BatchSubmitted {
            batch_id: id,
            device_id,
            delta_count: deltas.len(),
        }];
        Self {
            id,
            device_id,
            status: BatchStatus::Pending,
            deltas,
            conflicts: Vec::new(),
            submitted_at,
            processed_at: None,
            failure: None,
            events,
        }
    }

    /// Batch id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Submitting device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Persisted status. Never `Processing`.
    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Deltas in submission order.
    pub fn deltas(&self) -> &[SyncDelta] {
        &self.deltas
    }

    /// Conflicts in detection order.
    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    /// Submission time.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Time processing finished or failed.
    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// Reason the batch failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Looks up one of this batch's conflicts.
    pub fn conflict(&self, conflict_id: &Uuid) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|c| c.id == *conflict_id)
    }

    /// Deltas written to the version store.
    pub fn applied_count(&self) -> usize {
        self.deltas
            .iter()
            .filter(|d| d.is_processed())
            .count()
            .saturating_sub(self.conflicts.len())
    }

    /// Conflicts still waiting for a decision.
    pub fn open_conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    /// Marks delta `index` as applied at `version`.
    pub fn record_applied(&mut self, index: usize, version: SyncVersion) {
        debug_assert!(index < self.deltas.len(), "delta index {index} out of range");
        let Some(delta) = self.deltas.get_mut(index) else {
            return;
        };
        delta.server_version = Some(version);
        self.events.push(SyncEvent::DeltaApplied {
            batch_id: self.id,
            entity_ref: delta.entity_ref.clone(),
            version,
        });
    }

    /// Attaches the conflict raised by delta `index`.
    pub fn record_conflict(&mut self, index: usize, conflict: ConflictRecord) {
        if let Some(delta) = self.deltas.get_mut(index) {
            delta.server_version = Some(conflict.server_version);
        }
        self.events.push(SyncEvent::ConflictDetected {
            batch_id: self.id,
            conflict_id: conflict.id,
            entity_ref: conflict.entity_ref.clone(),
        });
        self.conflicts.push(conflict);
    }

    /// Moves the batch to its terminal processed status.
    ///
    /// A batch with only conflicts is `PartialConflict`, never `Failed`.
    pub fn finish(&mut self, at: DateTime<Utc>) -> BatchStatus {
        self.status = if self.conflicts.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::PartialConflict
        };
        self.processed_at = Some(at);
        self.events.push(SyncEvent::BatchProcessed {
            batch_id: self.id,
            status: self.status,
            applied: self.applied_count(),
            conflicts: self.conflicts.len(),
        });
        self.status
    }

    /// Marks the batch `Failed`.
    pub fn mark_failed(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        let reason = reason.into();
        self.status = BatchStatus::Failed;
        self.processed_at = Some(at);
        self.failure = Some(reason.clone());
        self.events.push(SyncEvent::BatchFailed {
            batch_id: self.id,
            reason,
        });
    }

    /// Resolves one of this batch's conflicts and returns the resolved record.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        resolved_payload: DeltaPayload,
        written_version: Option<SyncVersion>,
        at: DateTime<Utc>,
    ) -> CoreResult<ConflictRecord> {
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.id == conflict_id)
            .ok_or(CoreError::ConflictNotFound(conflict_id))?;
        conflict.resolve(strategy, resolved_payload, at)?;
        let resolved = conflict.clone();
        self.events.push(SyncEvent::ConflictResolved {
            conflict_id,
            strategy,
            written_version,
        });
        Ok(resolved)
    }

    /// Replaces a conflict with its committed state.
    pub(crate) fn apply_conflict(&mut self, conflict: ConflictRecord) {
        if let Some(slot) = self.conflicts.iter_mut().find(|c| c.id == conflict.id) {
            *slot = conflict;
        }
    }

    /// Drains the events collected since the last call.
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::ConflictStatus;

    fn delta(base: u64) -> SyncDelta {
        SyncDelta::new(
            EntityReference::new("installation", Uuid::new_v4()),
            DeltaOperation::Update,
            SyncVersion::new(base),
            DeltaPayload::from("client"),
            Utc::now(),
        )
    }

    fn conflict_for(delta: &SyncDelta) -> ConflictRecord {
        ConflictRecord::detect(
            delta,
            delta.base_version.increment(),
            DeltaPayload::from("server"),
            Utc::now(),
        )
    }

    #[test]
    fn submit_is_pending_and_announced() {
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![delta(0)], Utc::now());
        assert_eq!(batch.status(), BatchStatus::Pending);
        assert!(batch.processed_at().is_none());

        let events = batch.take_events();
        assert!(matches!(
            events.as_slice(),
            [SyncEvent::BatchSubmitted { delta_count: 1, .. }]
        ));
        assert!(batch.take_events().is_empty());
    }

    #[test]
    fn all_applied_completes() {
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![delta(0), delta(0)], Utc::now());
        batch.record_applied(0, SyncVersion::new(1));
        batch.record_applied(1, SyncVersion::new(1));

        assert_eq!(batch.finish(Utc::now()), BatchStatus::Completed);
        assert_eq!(batch.applied_count(), 2);
        assert!(batch.processed_at().is_some());
    }

    #[test]
    fn only_conflicts_is_partial_conflict() {
        let d = delta(0);
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![d.clone()], Utc::now());
        batch.record_conflict(0, conflict_for(&d));

        assert_eq!(batch.finish(Utc::now()), BatchStatus::PartialConflict);
        assert_eq!(batch.applied_count(), 0);
        assert_eq!(batch.conflicts().len(), 1);
        assert_eq!(batch.deltas()[0].server_version, Some(SyncVersion::new(1)));
    }

    #[test]
    fn resolve_unknown_conflict_is_not_found() {
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![delta(0)], Utc::now());
        let err = batch
            .resolve_conflict(
                Uuid::new_v4(),
                ResolutionStrategy::ServerWins,
                DeltaPayload::empty(),
                None,
                Utc::now(),
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn resolve_updates_owned_conflict() {
        let d = delta(0);
        let conflict = conflict_for(&d);
        let conflict_id = conflict.id;
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![d], Utc::now());
        batch.record_conflict(0, conflict);
        batch.finish(Utc::now());
        batch.take_events();

        let resolved = batch
            .resolve_conflict(
                conflict_id,
                ResolutionStrategy::ClientWins,
                DeltaPayload::from("client"),
                Some(SyncVersion::new(2)),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(resolved.status, ConflictStatus::ClientWins);
        assert_eq!(batch.conflict(&conflict_id).unwrap().status, ConflictStatus::ClientWins);
        assert_eq!(batch.open_conflicts().count(), 0);
        assert_eq!(batch.status(), BatchStatus::PartialConflict);
        assert_eq!(batch.take_events().len(), 1);
    }

    #[test]
    fn failed_batch_keeps_reason() {
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![delta(0)], Utc::now());
        batch.mark_failed("payload could not be decoded", Utc::now());
        assert_eq!(batch.status(), BatchStatus::Failed);
        assert_eq!(batch.failure(), Some("payload could not be decoded"));
    }

    #[test]
    fn from_dto_keeps_fields() {
        let entity = EntityReference::new("zone", Uuid::new_v4());
        let dto = DeltaDto::new(entity.clone(), DeltaOperation::Delete, SyncVersion::new(4), "");
        let d = SyncDelta::from_dto(dto.clone());
        assert_eq!(d.entity_ref, entity);
        assert_eq!(d.base_version, SyncVersion::new(4));
        assert_eq!(d.timestamp, dto.timestamp);
        assert!(!d.is_processed());
    }
}
