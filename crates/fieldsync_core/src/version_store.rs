//! Authoritative per-entity version ledger.
//!
//! One [`EntityVersionRecord`] per entity ever written. Records are created
//! on first write, replaced on every accepted delta or resolution, and never
//! deleted. Deletes are stored as tombstones carrying `DeltaOperation::Delete`.
//!
//! Changes are indexed by their commit stamp, so
//! [`VersionStore::get_changed_since`] walks entities in chronological order.

use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    ChangeDto, DeltaOperation, DeltaPayload, DeviceId, EntityReference, SyncVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// The current state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersionRecord {
    /// The entity.
    pub entity_ref: EntityReference,
    /// Highest accepted version.
    pub version: SyncVersion,
    /// Payload written at `version`.
    pub payload: DeltaPayload,
    /// Operation that produced `version`.
    pub operation: DeltaOperation,
    /// Device the write is attributed to.
    pub last_writer: DeviceId,
    /// Unique commit stamp of the write.
    pub updated_at: DateTime<Utc>,
}

impl EntityVersionRecord {
    /// Builds the change feed view of this record.
    pub fn to_change_dto(&self) -> ChangeDto {
        ChangeDto {
            entity_type: self.entity_ref.entity_type.clone(),
            entity_id: self.entity_ref.entity_id,
            operation: self.operation,
            version: self.version,
            payload: self.payload.clone(),
            timestamp: self.updated_at,
        }
    }

    /// Returns true if the entity is currently deleted.
    pub fn is_tombstone(&self) -> bool {
        self.operation.is_delete()
    }
}

/// A write staged by a unit of work, waiting for its commit stamp.
#[derive(Debug, Clone)]
pub(crate) struct VersionWrite {
    pub(crate) entity_ref: EntityReference,
    pub(crate) version: SyncVersion,
    pub(crate) payload: DeltaPayload,
    pub(crate) operation: DeltaOperation,
    pub(crate) writer: DeviceId,
}

impl VersionWrite {
    pub(crate) fn stamp(self, updated_at: DateTime<Utc>) -> EntityVersionRecord {
        EntityVersionRecord {
            entity_ref: self.entity_ref,
            version: self.version,
            payload: self.payload,
            operation: self.operation,
            last_writer: self.writer,
            updated_at,
        }
    }
}

/// In-memory version table with a chronological change index.
///
/// Callers are responsible for serializing read-decide-write sequences on
/// the same entity; [`VersionStore::set_version`] is not a compare-and-swap.
#[derive(Debug, Default)]
pub struct VersionStore {
    records: HashMap<EntityReference, EntityVersionRecord>,
    by_stamp: BTreeMap<DateTime<Utc>, EntityReference>,
}

impl VersionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of an entity, `0` if it was never written.
    pub fn get_current_version(&self, entity: &EntityReference) -> SyncVersion {
        self.records
            .get(entity)
            .map_or(SyncVersion::UNVERSIONED, |r| r.version)
    }

    /// Current record of an entity.
    pub fn get(&self, entity: &EntityReference) -> Option<&EntityVersionRecord> {
        self.records.get(entity)
    }

    /// Overwrites the record of `record.entity_ref` and returns the previous one.
    pub fn set_version(&mut self, record: EntityVersionRecord) -> Option<EntityVersionRecord> {
        if let Some(previous) = self.records.get(&record.entity_ref) {
            debug_assert!(
                record.version >= previous.version,
                "version of {} would move backwards",
                record.entity_ref
            );
            self.by_stamp.remove(&previous.updated_at);
        }
        self.by_stamp
            .insert(record.updated_at, record.entity_ref.clone());
        self.records.insert(record.entity_ref.clone(), record)
    }

    /// Records changed strictly after `since`, oldest first.
    ///
    /// Records last written by `exclude` are skipped before `limit` applies.
    pub fn get_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        exclude: Option<&DeviceId>,
        limit: usize,
    ) -> Vec<EntityVersionRecord> {
        let lower = since.map_or(Bound::Unbounded, Bound::Excluded);
        self.by_stamp
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, entity)| self.records.get(entity))
            .filter(|record| exclude.map_or(true, |device| record.last_writer != *device))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest commit stamp in the store.
    pub fn latest_stamp(&self) -> Option<DateTime<Utc>> {
        self.by_stamp.keys().next_back().copied()
    }

    /// Iterates over every record, oldest change first.
    pub fn iter(&self) -> impl Iterator<Item = &EntityVersionRecord> {
        self.by_stamp
            .values()
            .filter_map(|entity| self.records.get(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn record(
        entity: &EntityReference,
        version: u64,
        writer: DeviceId,
        at: DateTime<Utc>,
    ) -> EntityVersionRecord {
        VersionWrite {
            entity_ref: entity.clone(),
            version: SyncVersion::new(version),
            payload: DeltaPayload::from(format!("v{version}")),
            operation: DeltaOperation::Update,
            writer,
        }
        .stamp(at)
    }

    fn entity(kind: &str) -> EntityReference {
        EntityReference::new(kind, Uuid::new_v4())
    }

    #[test]
    fn unknown_entity_is_unversioned() {
        let store = VersionStore::new();
        assert_eq!(
            store.get_current_version(&entity("photo")),
            SyncVersion::UNVERSIONED
        );
        assert!(store.is_empty());
    }

    #[test]
    fn set_version_overwrites() {
        let mut store = VersionStore::new();
        let device = DeviceId::random();
        let e = entity("installation");
        let t0 = Utc::now();

        assert!(store.set_version(record(&e, 1, device, t0)).is_none());
        let previous = store
            .set_version(record(&e, 2, device, t0 + Duration::seconds(1)))
            .unwrap();

        assert_eq!(previous.version, SyncVersion::new(1));
        assert_eq!(store.get_current_version(&e), SyncVersion::new(2));
        assert_eq!(store.get(&e).unwrap().payload, DeltaPayload::from("v2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn changed_since_is_chronological_and_exclusive() {
        let mut store = VersionStore::new();
        let device = DeviceId::random();
        let t0 = Utc::now();
        let entities: Vec<_> = (0..3).map(|_| entity("zone")).collect();

        for (i, e) in entities.iter().enumerate() {
            store.set_version(record(e, 1, device, t0 + Duration::seconds(i as i64)));
        }

        let all = store.get_changed_since(None, None, 10);
        let order: Vec<_> = all.iter().map(|r| r.entity_ref.clone()).collect();
        assert_eq!(order, entities);

        let after_first = store.get_changed_since(Some(t0), None, 10);
        assert_eq!(after_first.len(), 2);
        assert_eq!(after_first[0].entity_ref, entities[1]);
    }

    #[test]
    fn rewrite_moves_entity_to_the_end() {
        let mut store = VersionStore::new();
        let device = DeviceId::random();
        let t0 = Utc::now();
        let a = entity("zone");
        let b = entity("zone");

        store.set_version(record(&a, 1, device, t0));
        store.set_version(record(&b, 1, device, t0 + Duration::seconds(1)));
        store.set_version(record(&a, 2, device, t0 + Duration::seconds(2)));

        let changes = store.get_changed_since(None, None, 10);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].entity_ref, b);
        assert_eq!(changes[1].entity_ref, a);
        assert_eq!(store.latest_stamp(), Some(t0 + Duration::seconds(2)));
    }

    #[test]
    fn exclusion_applies_before_limit() {
        let mut store = VersionStore::new();
        let me = DeviceId::random();
        let other = DeviceId::random();
        let t0 = Utc::now();

        store.set_version(record(&entity("photo"), 1, me, t0));
        store.set_version(record(&entity("photo"), 1, me, t0 + Duration::seconds(1)));
        let theirs = entity("photo");
        store.set_version(record(&theirs, 1, other, t0 + Duration::seconds(2)));

        let changes = store.get_changed_since(None, Some(&me), 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].entity_ref, theirs);
    }

    #[test]
    fn change_dto_mirrors_record() {
        let e = entity("measurement");
        let r = record(&e, 3, DeviceId::random(), Utc::now());
        let dto = r.to_change_dto();
        assert_eq!(dto.entity_id, e.entity_id);
        assert_eq!(dto.version, SyncVersion::new(3));
        assert_eq!(dto.timestamp, r.updated_at);
        assert!(!r.is_tombstone());
    }
}
