//! Business rules checked before any mutation.
//!
//! Each rule is a pure function returning the typed reason it is broken.
//! Composite checks chain them with `?`, so the first broken rule wins.

use crate::batch::{SyncBatch, SyncDelta};
use crate::conflict::ConflictRecord;
use fieldsync_protocol::{BatchStatus, ConflictStatus, DeltaPayload, ResolutionStrategy};
use thiserror::Error;
use uuid::Uuid;

/// A broken business rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// Batches are processed at most once.
    #[error("batch {batch_id} was already processed ({status})")]
    BatchAlreadyProcessed {
        /// The batch.
        batch_id: Uuid,
        /// Its terminal status.
        status: BatchStatus,
    },

    /// Another caller holds the batch.
    #[error("batch {batch_id} is being processed by another caller")]
    BatchInFlight {
        /// The batch.
        batch_id: Uuid,
    },

    /// Nothing to submit.
    #[error("a batch must contain at least one delta")]
    EmptyBatch,

    /// A delta names no entity type.
    #[error("delta {index} has an empty entity type")]
    MissingEntityType {
        /// Position in the batch.
        index: usize,
    },

    /// A delta payload exceeds the configured limit.
    #[error("delta {index} payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        /// Position in the batch.
        index: usize,
        /// Payload size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Conflicts resolve exactly once.
    #[error("conflict {conflict_id} is already resolved ({status})")]
    ConflictAlreadyResolved {
        /// The conflict.
        conflict_id: Uuid,
        /// Its resolved status.
        status: ConflictStatus,
    },

    /// Manual merges need the merged payload.
    #[error("manual merge of conflict {conflict_id} requires a merged payload")]
    MergePayloadRequired {
        /// The conflict.
        conflict_id: Uuid,
    },

    /// Feed pages hold at least one change.
    #[error("page limit must be at least 1")]
    ZeroPageLimit,
}

/// A feed page must be allowed to hold something.
pub fn page_limit_positive(limit: usize) -> Result<(), RuleViolation> {
    if limit == 0 {
        return Err(RuleViolation::ZeroPageLimit);
    }
    Ok(())
}

/// The batch must not have reached a terminal status.
pub fn batch_not_processed(batch: &SyncBatch) -> Result<(), RuleViolation> {
    let status = batch.status();
    if status.is_terminal() {
        return Err(RuleViolation::BatchAlreadyProcessed {
            batch_id: batch.id(),
            status,
        });
    }
    Ok(())
}

/// The batch must carry at least one delta.
pub fn batch_has_deltas(deltas: &[SyncDelta]) -> Result<(), RuleViolation> {
    if deltas.is_empty() {
        return Err(RuleViolation::EmptyBatch);
    }
    Ok(())
}

/// Every delta must name its entity type.
pub fn entity_types_present(deltas: &[SyncDelta]) -> Result<(), RuleViolation> {
    match deltas
        .iter()
        .position(|d| d.entity_ref.entity_type.trim().is_empty())
    {
        Some(index) => Err(RuleViolation::MissingEntityType { index }),
        None => Ok(()),
    }
}

/// Every payload must fit under `limit` bytes.
pub fn payloads_within(deltas: &[SyncDelta], limit: usize) -> Result<(), RuleViolation> {
    match deltas.iter().position(|d| d.payload.len() > limit) {
        Some(index) => Err(RuleViolation::PayloadTooLarge {
            index,
            size: deltas[index].payload.len(),
            limit,
        }),
        None => Ok(()),
    }
}

/// The conflict must still be open.
pub fn conflict_unresolved(conflict: &ConflictRecord) -> Result<(), RuleViolation> {
    if conflict.status.is_resolved() {
        return Err(RuleViolation::ConflictAlreadyResolved {
            conflict_id: conflict.id,
            status: conflict.status,
        });
    }
    Ok(())
}

/// `ManualMerge` must come with a payload.
pub fn merge_payload_present(
    conflict_id: Uuid,
    strategy: ResolutionStrategy,
    merged: Option<&DeltaPayload>,
) -> Result<(), RuleViolation> {
    if strategy.requires_payload() && merged.is_none() {
        return Err(RuleViolation::MergePayloadRequired { conflict_id });
    }
    Ok(())
}

/// Rules a new submission must satisfy.
pub fn check_submission(deltas: &[SyncDelta], max_payload: usize) -> Result<(), RuleViolation> {
    batch_has_deltas(deltas)?;
    entity_types_present(deltas)?;
    payloads_within(deltas, max_payload)
}

/// Rules a resolution must satisfy.
pub fn check_resolution(
    conflict: &ConflictRecord,
    strategy: ResolutionStrategy,
    merged: Option<&DeltaPayload>,
) -> Result<(), RuleViolation> {
    conflict_unresolved(conflict)?;
    merge_payload_present(conflict.id, strategy, merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldsync_protocol::{DeltaOperation, DeviceId, EntityReference, SyncVersion};

    fn delta(kind: &str, payload: &str) -> SyncDelta {
        SyncDelta::new(
            EntityReference::new(kind, Uuid::new_v4()),
            DeltaOperation::Create,
            SyncVersion::UNVERSIONED,
            DeltaPayload::from(payload),
            Utc::now(),
        )
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert_eq!(check_submission(&[], 10), Err(RuleViolation::EmptyBatch));
    }

    #[test]
    fn first_broken_rule_wins() {
        let deltas = vec![delta("zone", "ok"), delta(" ", "far too long a payload")];
        assert_eq!(
            check_submission(&deltas, 4),
            Err(RuleViolation::MissingEntityType { index: 1 })
        );
    }

    #[test]
    fn oversized_payload_reports_position() {
        let deltas = vec![delta("zone", "ok"), delta("zone", "toolong")];
        assert_eq!(
            payloads_within(&deltas, 4),
            Err(RuleViolation::PayloadTooLarge {
                index: 1,
                size: 7,
                limit: 4
            })
        );
        assert!(check_submission(&deltas[..1], 4).is_ok());
    }

    #[test]
    fn processed_batch_is_rejected() {
        let mut batch = SyncBatch::submit(DeviceId::random(), vec![delta("zone", "x")], Utc::now());
        assert!(batch_not_processed(&batch).is_ok());

        batch.record_applied(0, SyncVersion::new(1));
        batch.finish(Utc::now());
        assert!(matches!(
            batch_not_processed(&batch),
            Err(RuleViolation::BatchAlreadyProcessed {
                status: BatchStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn merge_needs_payload() {
        let id = Uuid::new_v4();
        assert!(merge_payload_present(id, ResolutionStrategy::ManualMerge, None).is_err());
        assert!(merge_payload_present(id, ResolutionStrategy::ClientWins, None).is_ok());
        assert!(merge_payload_present(
            id,
            ResolutionStrategy::ManualMerge,
            Some(&DeltaPayload::from("m"))
        )
        .is_ok());
    }

    #[test]
    fn violation_messages_are_readable() {
        let msg = RuleViolation::MergePayloadRequired {
            conflict_id: Uuid::nil(),
        }
        .to_string();
        assert!(msg.contains("requires a merged payload"));
    }
}
