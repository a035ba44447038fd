//! The sync engine facade.

use crate::batch::{SyncBatch, SyncDelta};
use crate::cancel::CancelToken;
use crate::change_feed;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::SyncEvent;
use crate::journal::{BatchChange, CommitKind, JournalStats};
use crate::processor::{self, BatchOutcome};
use crate::resolver::{self, Resolution};
use crate::rules::{self, RuleViolation};
use crate::store::SyncStore;
use crate::version_store::EntityVersionRecord;
use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    BatchStatus, BatchStatusResponse, ChangesResponse, ConflictDto, ConflictStatus, DeltaDto,
    DeltaPayload, DeviceId, EntityReference, ResolutionStrategy, SyncVersion,
};
use fieldsync_storage::{InMemoryBackend, StorageBackend};
use serde::Serialize;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Read-side view of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    /// Batch id.
    pub id: Uuid,
    /// Submitting device.
    pub device_id: DeviceId,
    /// Status; `Processing` while a processor holds a `Pending` batch.
    pub status: BatchStatus,
    /// Number of deltas.
    pub delta_count: usize,
    /// Deltas written to the version store.
    pub applied_count: usize,
    /// Conflicts recorded.
    pub conflict_count: usize,
    /// Conflicts still unresolved.
    pub open_conflicts: usize,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Time processing finished.
    pub processed_at: Option<DateTime<Utc>>,
    /// Failure reason for `Failed` batches.
    pub failure: Option<String>,
}

impl BatchView {
    fn new(batch: &SyncBatch, in_flight: bool) -> Self {
        let status = match batch.status() {
            BatchStatus::Pending if in_flight => BatchStatus::Processing,
            status => status,
        };
        Self {
            id: batch.id(),
            device_id: batch.device_id(),
            status,
            delta_count: batch.deltas().len(),
            applied_count: batch.applied_count(),
            conflict_count: batch.conflicts().len(),
            open_conflicts: batch.open_conflicts().count(),
            submitted_at: batch.submitted_at(),
            processed_at: batch.processed_at(),
            failure: batch.failure().map(str::to_owned),
        }
    }

    /// Boundary form of the view.
    pub fn to_response(&self) -> BatchStatusResponse {
        BatchStatusResponse {
            batch_id: self.id,
            device_id: self.device_id,
            status: self.status,
            delta_count: u32::try_from(self.delta_count).unwrap_or(u32::MAX),
            conflict_count: u32::try_from(self.conflict_count).unwrap_or(u32::MAX),
            submitted_at: self.submitted_at,
            processed_at: self.processed_at,
        }
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Tracked entities.
    pub entities: usize,
    /// Batches ever submitted.
    pub batches: usize,
    /// Batches still `Pending`.
    pub pending_batches: usize,
    /// Batches in `Failed`.
    pub failed_batches: usize,
    /// Unresolved conflicts.
    pub open_conflicts: usize,
    /// Resolved conflicts.
    pub resolved_conflicts: usize,
}

/// Synchronization and conflict-resolution engine.
///
/// Thread-safe: share it behind an `Arc` and call from any thread. Batches
/// touching different entities are processed in parallel; read-decide-write
/// on one entity is always serialized.
///
/// # Example
///
/// ```rust,ignore
/// use fieldsync_core::{SyncEngine, SyncDelta};
///
/// let engine = SyncEngine::open_in_memory()?;
/// let outcome = engine.process_sync_batch(device, deltas)?;
/// for conflict in &outcome.conflicts {
///     engine.resolve_conflict(conflict.id, ResolutionStrategy::ClientWins, None)?;
/// }
/// ```
#[derive(Debug)]
pub struct SyncEngine {
    store: SyncStore,
}

impl SyncEngine {
    /// Opens an engine over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` if the journal holds an invalid record,
    /// or a storage error if it cannot be read.
    pub fn open(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::open_with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Opens an engine with a custom clock.
    pub fn open_with_clock(
        config: Config,
        backend: Box<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Ok(Self {
            store: SyncStore::open(config, backend, clock)?,
        })
    }

    /// Opens an empty in-memory engine.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Config::default(), Box::new(InMemoryBackend::new()))
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        self.store.config()
    }

    /// Stores a new `Pending` batch and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a rule violation for empty batches, blank entity types and
    /// oversized payloads, or a storage error if the journal write fails.
    pub fn submit_batch(&self, device_id: DeviceId, deltas: Vec<SyncDelta>) -> CoreResult<Uuid> {
        rules::check_submission(&deltas, self.config().max_payload_bytes)?;

        let mut batch = SyncBatch::submit(device_id, deltas, self.store.stamps().now());
        let batch_id = batch.id();
        let delta_count = batch.deltas().len();

        let mut uow = self.store.begin(std::iter::empty());
        uow.push_events(batch.take_events());
        uow.commit(CommitKind::BatchSubmitted, BatchChange::Upsert(batch))?;

        info!(batch_id = %batch_id, device_id = %device_id, deltas = delta_count, "batch submitted");
        Ok(batch_id)
    }

    /// Processes a `Pending` batch.
    ///
    /// # Errors
    ///
    /// Returns `BatchNotFound`, a rule violation if the batch is terminal or
    /// already being processed, or a storage error. On a storage error the
    /// batch stays `Pending` and can be processed again.
    pub fn process_batch(&self, batch_id: Uuid) -> CoreResult<BatchOutcome> {
        self.process_batch_with(batch_id, &CancelToken::new())
    }

    /// Processes a batch, giving up before commit if `cancel` is set.
    pub fn process_batch_with(
        &self,
        batch_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<BatchOutcome> {
        processor::process_batch(&self.store, batch_id, cancel)
    }

    /// Submits and processes a batch in one call.
    ///
    /// With a non-manual auto-resolve policy, the conflicts this batch raised
    /// are resolved right away and the outcome reports their final status.
    pub fn process_sync_batch(
        &self,
        device_id: DeviceId,
        deltas: Vec<DeltaDto>,
    ) -> CoreResult<BatchOutcome> {
        let deltas = deltas.into_iter().map(SyncDelta::from_dto).collect();
        let batch_id = self.submit_batch(device_id, deltas)?;
        let outcome = self.process_batch(batch_id)?;

        let Some(strategy) = self.config().auto_resolve.strategy() else {
            return Ok(outcome);
        };
        if outcome.is_clean() {
            return Ok(outcome);
        }

        for conflict in &outcome.conflicts {
            if let Err(err) = self.resolve_conflict(conflict.id, strategy, None) {
                warn!(
                    conflict_id = %conflict.id,
                    error = %err,
                    "automatic resolution failed, conflict left open"
                );
            }
        }

        let state = self.store.read();
        let refreshed = state
            .batches
            .get(&batch_id)
            .map_or(outcome, BatchOutcome::from_batch);
        Ok(refreshed)
    }

    /// Resolves a conflict.
    ///
    /// # Errors
    ///
    /// Returns `ConflictNotFound`, a rule violation if the conflict is already
    /// resolved or a manual merge has no payload, or a storage error.
    pub fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_payload: Option<DeltaPayload>,
    ) -> CoreResult<Resolution> {
        self.resolve_conflict_with(conflict_id, strategy, merged_payload, &CancelToken::new())
    }

    /// Resolves a conflict, giving up before commit if `cancel` is set.
    pub fn resolve_conflict_with(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        merged_payload: Option<DeltaPayload>,
        cancel: &CancelToken,
    ) -> CoreResult<Resolution> {
        resolver::resolve_conflict(&self.store, conflict_id, strategy, merged_payload, cancel)
    }

    /// Resolves every open conflict with the configured policy.
    ///
    /// Returns the number of conflicts resolved; `0` under `Manual`.
    pub fn auto_resolve_open_conflicts(&self) -> CoreResult<usize> {
        let Some(strategy) = self.config().auto_resolve.strategy() else {
            return Ok(0);
        };

        let open: Vec<Uuid> = self
            .get_conflicts(None, Some(ConflictStatus::Unresolved))
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut resolved = 0;
        for conflict_id in open {
            match self.resolve_conflict(conflict_id, strategy, None) {
                Ok(_) => resolved += 1,
                Err(CoreError::Rule(RuleViolation::ConflictAlreadyResolved { .. })) => {}
                Err(err) => return Err(err),
            }
        }
        info!(resolved, strategy = %strategy, "auto-resolved open conflicts");
        Ok(resolved)
    }

    /// Changes by other devices since `since`, oldest first, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`RuleViolation::ZeroPageLimit`] if `limit` is 0.
    pub fn changes_since(
        &self,
        device_id: &DeviceId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> CoreResult<ChangesResponse> {
        change_feed::changes_since(&self.store, device_id, since, limit)
    }

    /// Lists conflicts, oldest first.
    pub fn get_conflicts(
        &self,
        device_id: Option<DeviceId>,
        status: Option<ConflictStatus>,
    ) -> Vec<ConflictDto> {
        let state = self.store.read();
        let mut conflicts: Vec<ConflictDto> = state
            .batches
            .values()
            .filter(|b| device_id.map_or(true, |d| b.device_id() == d))
            .flat_map(|b| {
                b.conflicts()
                    .iter()
                    .filter(|c| status.map_or(true, |s| c.status == s))
                    .map(|c| c.to_dto(b.id(), b.device_id()))
            })
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        conflicts
    }

    /// Looks up a batch.
    pub fn get_batch(&self, batch_id: Uuid) -> CoreResult<BatchView> {
        let state = self.store.read();
        let batch = state
            .batches
            .get(&batch_id)
            .ok_or(CoreError::BatchNotFound(batch_id))?;
        Ok(BatchView::new(batch, self.store.is_in_flight(&batch_id)))
    }

    /// Lists batches, oldest submission first.
    pub fn list_batches(&self, status: Option<BatchStatus>) -> Vec<BatchView> {
        let state = self.store.read();
        let mut views: Vec<BatchView> = state
            .batches
            .values()
            .map(|b| BatchView::new(b, self.store.is_in_flight(&b.id())))
            .filter(|v| status.map_or(true, |s| v.status == s))
            .collect();
        views.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        views
    }

    /// Current version of an entity, `0` if never written.
    pub fn version_of(&self, entity: &EntityReference) -> SyncVersion {
        self.store.read().versions.get_current_version(entity)
    }

    /// Current record of an entity.
    pub fn record_of(&self, entity: &EntityReference) -> Option<EntityVersionRecord> {
        self.store.read().versions.get(entity).cloned()
    }

    /// Receives every event committed from now on.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.store.events().subscribe()
    }

    /// Engine-wide counters.
    pub fn stats(&self) -> EngineStats {
        let state = self.store.read();
        let mut stats = EngineStats {
            entities: state.versions.len(),
            batches: state.batches.len(),
            ..EngineStats::default()
        };
        for batch in state.batches.values() {
            match batch.status() {
                BatchStatus::Pending => stats.pending_batches += 1,
                BatchStatus::Failed => stats.failed_batches += 1,
                _ => {}
            }
            for conflict in batch.conflicts() {
                if conflict.is_resolved() {
                    stats.resolved_conflicts += 1;
                } else {
                    stats.open_conflicts += 1;
                }
            }
        }
        stats
    }

    /// Walks the journal and reports its shape.
    pub fn journal_stats(&self) -> CoreResult<JournalStats> {
        self.store.journal_stats()
    }

    /// Flushes the journal.
    pub fn flush(&self) -> CoreResult<()> {
        self.store.flush()
    }
}
