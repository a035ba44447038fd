//! Conflict records and the conflict ledger.

use crate::batch::SyncDelta;
use crate::rules::{self, RuleViolation};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    ConflictDto, ConflictStatus, DeltaOperation, DeltaPayload, DeviceId, EntityReference,
    ResolutionStrategy, SyncVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A delta whose base version did not match the stored version.
///
/// Owned by the batch the delta arrived in. Created `Unresolved` and
/// resolved exactly once; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict id.
    pub id: Uuid,
    /// Delta that raised the conflict.
    pub delta_id: Uuid,
    /// The entity.
    pub entity_ref: EntityReference,
    /// Operation the device attempted.
    pub operation: DeltaOperation,
    /// Payload the device tried to write.
    pub client_payload: DeltaPayload,
    /// Payload stored at detection time.
    pub server_payload: DeltaPayload,
    /// Base version of the delta.
    pub client_version: SyncVersion,
    /// Stored version at detection time.
    pub server_version: SyncVersion,
    /// Lifecycle status.
    pub status: ConflictStatus,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
    /// Payload chosen by the resolution.
    pub resolved_payload: Option<DeltaPayload>,
    /// Resolution time.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Records a stale delta against the stored state.
    pub fn detect(
        delta: &SyncDelta,
        server_version: SyncVersion,
        server_payload: DeltaPayload,
        detected_at: DateTime<Utc>,
    ) -> Self {
        debug_assert_ne!(delta.base_version, server_version);
        Self {
            id: Uuid::new_v4(),
            delta_id: delta.id,
            entity_ref: delta.entity_ref.clone(),
            operation: delta.operation,
            client_payload: delta.payload.clone(),
            server_payload,
            client_version: delta.base_version,
            server_version,
            status: ConflictStatus::Unresolved,
            detected_at,
            resolved_payload: None,
            resolved_at: None,
        }
    }

    /// Returns true once a strategy has been applied.
    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }

    /// Applies a strategy. Fails if the conflict was already resolved.
    pub fn resolve(
        &mut self,
        strategy: ResolutionStrategy,
        resolved_payload: DeltaPayload,
        at: DateTime<Utc>,
    ) -> Result<(), RuleViolation> {
        rules::conflict_unresolved(self)?;
        self.status = strategy.into();
        self.resolved_payload = Some(resolved_payload);
        self.resolved_at = Some(at);
        Ok(())
    }

    /// Boundary view of the conflict.
    pub fn to_dto(&self, batch_id: Uuid, device_id: DeviceId) -> ConflictDto {
        ConflictDto {
            id: self.id,
            batch_id,
            device_id,
            entity_type: self.entity_ref.entity_type.clone(),
            entity_id: self.entity_ref.entity_id,
            client_payload: self.client_payload.clone(),
            server_payload: self.server_payload.clone(),
            client_version: self.client_version,
            server_version: self.server_version,
            status: self.status,
            detected_at: self.detected_at,
            resolved_payload: self.resolved_payload.clone(),
            resolved_at: self.resolved_at,
        }
    }
}

/// Index from conflict id to the batch that owns it.
#[derive(Debug, Default)]
pub struct ConflictLedger {
    owners: HashMap<Uuid, Uuid>,
}

impl ConflictLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `batch_id` owns `conflict_id`.
    pub fn insert(&mut self, conflict_id: Uuid, batch_id: Uuid) {
        self.owners.insert(conflict_id, batch_id);
    }

    /// The batch owning a conflict.
    pub fn batch_of(&self, conflict_id: &Uuid) -> Option<Uuid> {
        self.owners.get(conflict_id).copied()
    }

    /// Number of conflicts ever recorded.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if no conflict was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale_delta() -> SyncDelta {
        SyncDelta::new(
            EntityReference::new("photo", Uuid::new_v4()),
            DeltaOperation::Update,
            SyncVersion::new(1),
            DeltaPayload::from("client"),
            Utc::now(),
        )
    }

    #[test]
    fn detect_copies_both_sides() {
        let delta = stale_delta();
        let conflict = ConflictRecord::detect(
            &delta,
            SyncVersion::new(3),
            DeltaPayload::from("server"),
            Utc::now(),
        );

        assert_eq!(conflict.delta_id, delta.id);
        assert_eq!(conflict.client_version, SyncVersion::new(1));
        assert_eq!(conflict.server_version, SyncVersion::new(3));
        assert_eq!(conflict.client_payload, DeltaPayload::from("client"));
        assert_eq!(conflict.server_payload, DeltaPayload::from("server"));
        assert_eq!(conflict.status, ConflictStatus::Unresolved);
    }

    #[test]
    fn resolves_exactly_once() {
        let mut conflict = ConflictRecord::detect(
            &stale_delta(),
            SyncVersion::new(2),
            DeltaPayload::from("server"),
            Utc::now(),
        );

        conflict
            .resolve(
                ResolutionStrategy::ClientWins,
                DeltaPayload::from("client"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(conflict.status, ConflictStatus::ClientWins);
        assert!(conflict.resolved_at.is_some());

        let before = conflict.clone();
        let err = conflict
            .resolve(ResolutionStrategy::ServerWins, DeltaPayload::empty(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RuleViolation::ConflictAlreadyResolved { .. }));
        assert_eq!(conflict, before);
    }

    #[test]
    fn ledger_maps_conflicts_to_batches() {
        let mut ledger = ConflictLedger::new();
        let (conflict, batch) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.insert(conflict, batch);
        assert_eq!(ledger.batch_of(&conflict), Some(batch));
        assert_eq!(ledger.batch_of(&Uuid::new_v4()), None);
        assert_eq!(ledger.len(), 1);
    }
}
