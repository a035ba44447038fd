//! Engine state, its journal and the commit path.
//!
//! `SyncStore` owns every mutable piece of the engine:
//! - the version store, batch table and conflict ledger behind one `RwLock`
//! - the journal every commit goes through
//! - the entity lock stripes and the in-flight batch set
//! - the commit stamp issuer and the post-commit event bus
//!
//! ## Commit ordering
//!
//! Commits take the state write lock, stamp their writes, append the journal
//! record and apply it before releasing the lock. Change feed cursors are
//! stamped under the read lock, so every later commit is stamped above them.

use crate::batch::SyncBatch;
use crate::clock::{Clock, StampIssuer};
use crate::config::Config;
use crate::conflict::ConflictLedger;
use crate::error::CoreResult;
use crate::events::{EventBus, SyncEvent};
use crate::journal::{BatchChange, CommitKind, CommitRecord, Journal, JournalStats};
use crate::locks::EntityLocks;
use crate::rules::RuleViolation;
use crate::uow::UnitOfWork;
use crate::version_store::{EntityVersionRecord, VersionStore, VersionWrite};
use fieldsync_protocol::EntityReference;
use fieldsync_storage::StorageBackend;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Everything rebuilt from the journal.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) versions: VersionStore,
    pub(crate) batches: HashMap<Uuid, SyncBatch>,
    pub(crate) ledger: ConflictLedger,
}

impl StoreState {
    /// Applies a committed record. Used by both commit and replay.
    fn apply(&mut self, record: CommitRecord) {
        for write in record.writes {
            self.versions.set_version(write);
        }
        match record.change {
            BatchChange::Upsert(batch) => {
                for conflict in batch.conflicts() {
                    self.ledger.insert(conflict.id, batch.id());
                }
                self.batches.insert(batch.id(), batch);
            }
            BatchChange::ResolveConflict { batch_id, conflict } => {
                if let Some(batch) = self.batches.get_mut(&batch_id) {
                    batch.apply_conflict(conflict);
                }
            }
        }
    }
}

pub(crate) struct SyncStore {
    config: Config,
    state: RwLock<StoreState>,
    journal: Journal,
    locks: EntityLocks,
    stamps: StampIssuer,
    in_flight: Mutex<HashSet<Uuid>>,
    events: EventBus,
}

impl SyncStore {
    /// Opens the store and replays the journal.
    pub(crate) fn open(
        config: Config,
        backend: Box<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let journal = Journal::new(backend, config.sync_on_commit);
        let stamps = StampIssuer::new(clock);
        let mut state = StoreState::default();

        let records = journal.recover()?;
        let replayed = records.len();
        for record in records {
            stamps.observe(record.committed_at);
            for write in &record.writes {
                stamps.observe(write.updated_at);
            }
            state.apply(record);
        }

        info!(
            records = replayed,
            entities = state.versions.len(),
            batches = state.batches.len(),
            "sync store opened"
        );

        Ok(Self {
            locks: EntityLocks::new(config.lock_stripes),
            config,
            state: RwLock::new(state),
            journal,
            stamps,
            in_flight: Mutex::new(HashSet::new()),
            events: EventBus::new(),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    pub(crate) fn stamps(&self) -> &StampIssuer {
        &self.stamps
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn journal_stats(&self) -> CoreResult<JournalStats> {
        self.journal.scan().map(|(_, stats)| stats)
    }

    pub(crate) fn flush(&self) -> CoreResult<()> {
        self.journal.flush()
    }

    /// Marks a batch as held by the caller until the claim drops.
    pub(crate) fn claim(&self, batch_id: Uuid) -> Result<BatchClaim<'_>, RuleViolation> {
        if !self.in_flight.lock().insert(batch_id) {
            return Err(RuleViolation::BatchInFlight { batch_id });
        }
        Ok(BatchClaim {
            store: self,
            batch_id,
        })
    }

    pub(crate) fn is_in_flight(&self, batch_id: &Uuid) -> bool {
        self.in_flight.lock().contains(batch_id)
    }

    /// Starts a unit of work over `entities`, blocking until their stripes
    /// are free.
    pub(crate) fn begin<'s, 'e>(
        &'s self,
        entities: impl IntoIterator<Item = &'e EntityReference>,
    ) -> UnitOfWork<'s> {
        UnitOfWork::new(self, self.locks.lock_all(entities))
    }

    /// Makes a unit of work durable and visible, then publishes its events.
    ///
    /// On error nothing is applied and no event is published.
    pub(crate) fn commit(
        &self,
        kind: CommitKind,
        writes: Vec<VersionWrite>,
        change: BatchChange,
        events: Vec<SyncEvent>,
    ) -> CoreResult<Vec<EntityVersionRecord>> {
        let mut state = self.state.write();

        let record = CommitRecord {
            kind,
            committed_at: self.stamps.now(),
            writes: writes
                .into_iter()
                .map(|w| w.stamp(self.stamps.next()))
                .collect(),
            change,
        };
        self.journal.append(&record)?;

        let written = record.writes.clone();
        state.apply(record);
        drop(state);

        self.events.publish(events);
        Ok(written)
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("config", &self.config)
            .field("journal", &self.journal)
            .field("lock_stripes", &self.locks.len())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a batch for the duration of one processing call.
pub(crate) struct BatchClaim<'s> {
    store: &'s SyncStore,
    batch_id: Uuid,
}

impl Drop for BatchClaim<'_> {
    fn drop(&mut self) {
        self.store.in_flight.lock().remove(&self.batch_id);
    }
}
