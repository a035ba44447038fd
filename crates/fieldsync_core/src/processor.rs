//! Batch processor.
//!
//! Walks a batch's deltas in submission order. A delta whose base version
//! matches the stored version advances its entity by one; any other delta
//! becomes a conflict record and leaves the entity untouched. The whole walk
//! commits as one journal record.

use crate::batch::SyncBatch;
use crate::cancel::CancelToken;
use crate::conflict::ConflictRecord;
use crate::error::{CoreError, CoreResult};
use crate::journal::{BatchChange, CommitKind};
use crate::rules;
use crate::store::SyncStore;
use crate::version_store::VersionWrite;
use fieldsync_protocol::{
    BatchStatus, ConflictDto, DeltaPayload, EntityReference, ProcessBatchResponse,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of processing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// The batch.
    pub batch_id: Uuid,
    /// Terminal status.
    pub status: BatchStatus,
    /// Deltas written to the version store.
    pub applied_count: usize,
    /// Deltas that produced conflicts.
    pub conflict_count: usize,
    /// The conflicts, in submission order.
    pub conflicts: Vec<ConflictDto>,
}

impl BatchOutcome {
    pub(crate) fn from_batch(batch: &SyncBatch) -> Self {
        Self {
            batch_id: batch.id(),
            status: batch.status(),
            applied_count: batch.applied_count(),
            conflict_count: batch.conflicts().len(),
            conflicts: batch
                .conflicts()
                .iter()
                .map(|c| c.to_dto(batch.id(), batch.device_id()))
                .collect(),
        }
    }

    /// Returns true if every delta was applied.
    pub fn is_clean(&self) -> bool {
        self.conflict_count == 0
    }

    /// Boundary form of the outcome.
    pub fn to_response(&self) -> ProcessBatchResponse {
        ProcessBatchResponse {
            batch_id: self.batch_id,
            applied_count: u32::try_from(self.applied_count).unwrap_or(u32::MAX),
            conflict_count: u32::try_from(self.conflict_count).unwrap_or(u32::MAX),
            conflicts: self.conflicts.clone(),
        }
    }
}

/// Processes a `Pending` batch at most once.
pub(crate) fn process_batch(
    store: &SyncStore,
    batch_id: Uuid,
    cancel: &CancelToken,
) -> CoreResult<BatchOutcome> {
    let _claim = store.claim(batch_id)?;

    let mut batch = store
        .read()
        .batches
        .get(&batch_id)
        .cloned()
        .ok_or(CoreError::BatchNotFound(batch_id))?;
    rules::batch_not_processed(&batch)?;

    let entities: Vec<EntityReference> = batch
        .deltas()
        .iter()
        .map(|d| d.entity_ref.clone())
        .collect();
    debug!(batch_id = %batch_id, deltas = entities.len(), "processing batch");

    let mut uow = store.begin(&entities);
    let detected_at = store.stamps().now();

    for index in 0..batch.deltas().len() {
        let delta = batch.deltas()[index].clone();
        let current = uow.current_version(&delta.entity_ref);

        if delta.base_version == current {
            let next = current.increment();
            uow.stage_write(VersionWrite {
                entity_ref: delta.entity_ref,
                version: next,
                payload: delta.payload,
                operation: delta.operation,
                writer: batch.device_id(),
            });
            batch.record_applied(index, next);
        } else {
            let stored = uow
                .current_payload(&delta.entity_ref)
                .unwrap_or_else(DeltaPayload::empty);
            let conflict = ConflictRecord::detect(&delta, current, stored, detected_at);
            debug!(
                batch_id = %batch_id,
                conflict_id = %conflict.id,
                entity = %delta.entity_ref,
                base = %delta.base_version,
                current = %current,
                "conflict detected"
            );
            batch.record_conflict(index, conflict);
        }
    }

    batch.finish(store.stamps().now());
    cancel.check()?;
    debug!(batch_id = %batch_id, writes = uow.write_count(), "committing batch");

    let outcome = BatchOutcome::from_batch(&batch);
    uow.push_events(batch.take_events());

    match uow.commit(CommitKind::BatchProcessed, BatchChange::Upsert(batch)) {
        Ok(_) => {
            info!(
                batch_id = %batch_id,
                status = %outcome.status,
                applied = outcome.applied_count,
                conflicts = outcome.conflict_count,
                "batch processed"
            );
            Ok(outcome)
        }
        Err(err @ CoreError::Codec(_)) => {
            mark_failed(store, batch_id, &err);
            Err(err)
        }
        Err(err) => {
            warn!(batch_id = %batch_id, error = %err, "batch left pending");
            Err(err)
        }
    }
}

/// Moves a batch that can never be committed to `Failed`.
fn mark_failed(store: &SyncStore, batch_id: Uuid, cause: &CoreError) {
    let Some(mut batch) = store.read().batches.get(&batch_id).cloned() else {
        return;
    };
    batch.mark_failed(cause.to_string(), store.stamps().now());

    let mut uow = store.begin(std::iter::empty());
    uow.push_events(batch.take_events());
    match uow.commit(CommitKind::BatchFailed, BatchChange::Upsert(batch)) {
        Ok(_) => warn!(batch_id = %batch_id, error = %cause, "batch failed"),
        Err(err) => warn!(
            batch_id = %batch_id,
            error = %err,
            "could not record batch failure, batch left pending"
        ),
    }
}
