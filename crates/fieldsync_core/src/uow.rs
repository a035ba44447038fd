//! Failure-atomic units of work.
//!
//! A [`UnitOfWork`] holds the lock stripes of the entities it touches for
//! its whole life. Reads see its own staged writes first, then committed
//! state. Nothing is visible to anyone else until [`UnitOfWork::commit`]
//! has written the journal record; dropping it uncommitted discards
//! everything.

use crate::error::CoreResult;
use crate::events::SyncEvent;
use crate::journal::{BatchChange, CommitKind};
use crate::store::SyncStore;
use crate::version_store::{EntityVersionRecord, VersionWrite};
use fieldsync_protocol::{DeltaPayload, EntityReference, SyncVersion};
use parking_lot::MutexGuard;
use std::collections::HashMap;

pub(crate) struct UnitOfWork<'s> {
    store: &'s SyncStore,
    _guards: Vec<MutexGuard<'s, ()>>,
    writes: Vec<VersionWrite>,
    staged: HashMap<EntityReference, usize>,
    events: Vec<SyncEvent>,
}

impl<'s> UnitOfWork<'s> {
    pub(crate) fn new(store: &'s SyncStore, guards: Vec<MutexGuard<'s, ()>>) -> Self {
        Self {
            store,
            _guards: guards,
            writes: Vec::new(),
            staged: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Current version as this unit of work sees it.
    pub(crate) fn current_version(&self, entity: &EntityReference) -> SyncVersion {
        match self.staged.get(entity) {
            Some(&i) => self.writes[i].version,
            None => self.store.read().versions.get_current_version(entity),
        }
    }

    /// Current payload as this unit of work sees it.
    pub(crate) fn current_payload(&self, entity: &EntityReference) -> Option<DeltaPayload> {
        match self.staged.get(entity) {
            Some(&i) => Some(self.writes[i].payload.clone()),
            None => self
                .store
                .read()
                .versions
                .get(entity)
                .map(|r| r.payload.clone()),
        }
    }

    /// Stages a write. A later write to the same entity replaces it.
    pub(crate) fn stage_write(&mut self, write: VersionWrite) {
        match self.staged.get(&write.entity_ref) {
            Some(&i) => self.writes[i] = write,
            None => {
                self.staged.insert(write.entity_ref.clone(), self.writes.len());
                self.writes.push(write);
            }
        }
    }

    pub(crate) fn push_events(&mut self, events: Vec<SyncEvent>) {
        self.events.extend(events);
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Commits everything staged, still holding the stripes.
    pub(crate) fn commit(
        self,
        kind: CommitKind,
        change: BatchChange,
    ) -> CoreResult<Vec<EntityVersionRecord>> {
        self.store.commit(kind, self.writes, change, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{SyncBatch, SyncDelta};
    use crate::clock::SystemClock;
    use crate::config::Config;
    use chrono::Utc;
    use fieldsync_protocol::{DeltaOperation, DeviceId};
    use fieldsync_storage::InMemoryBackend;
    use std::sync::Arc;
    use uuid::Uuid;

    fn store() -> SyncStore {
        SyncStore::open(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    fn write(entity: &EntityReference, version: u64, payload: &str) -> VersionWrite {
        VersionWrite {
            entity_ref: entity.clone(),
            version: SyncVersion::new(version),
            payload: DeltaPayload::from(payload),
            operation: DeltaOperation::Update,
            writer: DeviceId::random(),
        }
    }

    fn batch_for(entity: &EntityReference) -> SyncBatch {
        let delta = SyncDelta::new(
            entity.clone(),
            DeltaOperation::Update,
            SyncVersion::UNVERSIONED,
            DeltaPayload::from("x"),
            Utc::now(),
        );
        SyncBatch::submit(DeviceId::random(), vec![delta], Utc::now())
    }

    #[test]
    fn staged_writes_are_read_back_but_not_published() {
        let store = store();
        let entity = EntityReference::new("zone", Uuid::new_v4());

        let mut uow = store.begin([&entity]);
        uow.stage_write(write(&entity, 1, "a"));
        uow.stage_write(write(&entity, 2, "b"));

        assert_eq!(uow.current_version(&entity), SyncVersion::new(2));
        assert_eq!(uow.current_payload(&entity), Some(DeltaPayload::from("b")));
        assert_eq!(uow.write_count(), 1);
        assert_eq!(
            store.read().versions.get_current_version(&entity),
            SyncVersion::UNVERSIONED
        );
    }

    #[test]
    fn dropping_discards_everything() {
        let store = store();
        let entity = EntityReference::new("zone", Uuid::new_v4());
        {
            let mut uow = store.begin([&entity]);
            uow.stage_write(write(&entity, 1, "a"));
        }
        assert!(store.read().versions.is_empty());
    }

    #[test]
    fn commit_makes_writes_visible() {
        let store = store();
        let entity = EntityReference::new("zone", Uuid::new_v4());

        let mut uow = store.begin([&entity]);
        uow.stage_write(write(&entity, 1, "a"));
        let written = uow
            .commit(
                CommitKind::BatchProcessed,
                BatchChange::Upsert(batch_for(&entity)),
            )
            .unwrap();

        assert_eq!(written[0].version, SyncVersion::new(1));
        assert_eq!(
            store.read().versions.get_current_version(&entity),
            SyncVersion::new(1)
        );
    }
}
