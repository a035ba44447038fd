//! Conflict resolver.
//!
//! Resolution runs under the conflict entity's lock stripe and re-reads both
//! the conflict and the stored version after taking it, so two callers can
//! never both resolve the same conflict and a resolution write always lands
//! on top of the latest version.
//!
//! `ServerWins` means the state stored *at resolution time* wins. It writes
//! nothing; if the entity advanced after detection, the newer payload is what
//! the conflict records as resolved.

use crate::cancel::CancelToken;
use crate::error::{CoreError, CoreResult};
use crate::journal::{BatchChange, CommitKind};
use crate::rules::{self, RuleViolation};
use crate::store::SyncStore;
use crate::version_store::VersionWrite;
use fieldsync_protocol::{
    ConflictDto, DeltaOperation, DeltaPayload, ResolutionStrategy, ResolveConflictResponse,
    SyncVersion,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The conflict in its resolved state.
    pub conflict: ConflictDto,
    /// Version written, `None` for `ServerWins`.
    pub written_version: Option<SyncVersion>,
}

impl Resolution {
    /// Boundary form of the resolution.
    pub fn to_response(&self) -> ResolveConflictResponse {
        ResolveConflictResponse {
            conflict_id: self.conflict.id,
            written_version: self.written_version,
        }
    }
}

/// Operation recorded for a resolution write.
fn written_operation(
    strategy: ResolutionStrategy,
    attempted: DeltaOperation,
    current: SyncVersion,
) -> DeltaOperation {
    match (strategy, attempted) {
        (ResolutionStrategy::ClientWins, DeltaOperation::Delete) => DeltaOperation::Delete,
        _ if current.is_unversioned() => DeltaOperation::Create,
        _ => DeltaOperation::Update,
    }
}

pub(crate) fn resolve_conflict(
    store: &SyncStore,
    conflict_id: Uuid,
    strategy: ResolutionStrategy,
    merged_payload: Option<DeltaPayload>,
    cancel: &CancelToken,
) -> CoreResult<Resolution> {
    let (batch_id, entity) = {
        let state = store.read();
        let batch_id = state
            .ledger
            .batch_of(&conflict_id)
            .ok_or(CoreError::ConflictNotFound(conflict_id))?;
        let conflict = state
            .batches
            .get(&batch_id)
            .and_then(|b| b.conflict(&conflict_id))
            .ok_or(CoreError::ConflictNotFound(conflict_id))?;
        rules::check_resolution(conflict, strategy, merged_payload.as_ref())?;
        (batch_id, conflict.entity_ref.clone())
    };

    let mut uow = store.begin([&entity]);

    let mut batch = store
        .read()
        .batches
        .get(&batch_id)
        .cloned()
        .ok_or(CoreError::BatchNotFound(batch_id))?;
    let conflict = batch
        .conflict(&conflict_id)
        .cloned()
        .ok_or(CoreError::ConflictNotFound(conflict_id))?;
    rules::check_resolution(&conflict, strategy, merged_payload.as_ref())?;

    let current = uow.current_version(&entity);
    let (resolved_payload, written_version) = match strategy {
        ResolutionStrategy::ServerWins => {
            if current != conflict.server_version {
                debug!(
                    conflict_id = %conflict_id,
                    entity = %entity,
                    detected = %conflict.server_version,
                    current = %current,
                    "entity advanced since detection, keeping current state"
                );
            }
            let stored = uow
                .current_payload(&entity)
                .unwrap_or_else(DeltaPayload::empty);
            (stored, None)
        }
        ResolutionStrategy::ClientWins | ResolutionStrategy::ManualMerge => {
            let payload = match strategy {
                ResolutionStrategy::ManualMerge => merged_payload
                    .ok_or(RuleViolation::MergePayloadRequired { conflict_id })?,
                _ => conflict.client_payload.clone(),
            };
            let next = current.increment();
            uow.stage_write(VersionWrite {
                entity_ref: entity.clone(),
                version: next,
                payload: payload.clone(),
                operation: written_operation(strategy, conflict.operation, current),
                writer: batch.device_id(),
            });
            (payload, Some(next))
        }
    };

    let resolved = batch.resolve_conflict(
        conflict_id,
        strategy,
        resolved_payload,
        written_version,
        store.stamps().now(),
    )?;
    cancel.check()?;

    let dto = resolved.to_dto(batch_id, batch.device_id());
    uow.push_events(batch.take_events());
    uow.commit(
        CommitKind::ConflictResolved,
        BatchChange::ResolveConflict {
            batch_id,
            conflict: resolved,
        },
    )?;

    info!(
        conflict_id = %conflict_id,
        entity = %entity,
        strategy = %strategy,
        written = ?written_version.map(SyncVersion::get),
        "conflict resolved"
    );

    Ok(Resolution {
        conflict: dto,
        written_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_operations() {
        let v0 = SyncVersion::UNVERSIONED;
        let v2 = SyncVersion::new(2);
        assert_eq!(
            written_operation(ResolutionStrategy::ClientWins, DeltaOperation::Create, v2),
            DeltaOperation::Update
        );
        assert_eq!(
            written_operation(ResolutionStrategy::ClientWins, DeltaOperation::Delete, v2),
            DeltaOperation::Delete
        );
        assert_eq!(
            written_operation(ResolutionStrategy::ManualMerge, DeltaOperation::Delete, v2),
            DeltaOperation::Update
        );
        assert_eq!(
            written_operation(ResolutionStrategy::ManualMerge, DeltaOperation::Update, v0),
            DeltaOperation::Create
        );
    }
}
