//! Engine behavior over a failing backend.

use fieldsync_core::{Config, CoreError, SyncEngine};
use fieldsync_protocol::{BatchStatus, DeviceId, ResolutionStrategy, SyncVersion};
use fieldsync_storage::{InMemoryBackend, StorageBackend};
use fieldsync_testkit::prelude::*;

fn engine_over(inner: &InMemoryBackend) -> (SyncEngine, FaultHandle) {
    let (backend, handle) = FailingBackend::new(inner.clone());
    let engine = SyncEngine::open(Config::default(), Box::new(backend)).unwrap();
    (engine, handle)
}

#[test]
fn crash_mid_append_leaves_no_trace() {
    let inner = InMemoryBackend::new();
    let (engine, faults) = engine_over(&inner);
    let zone = entity("zone");
    let batch_id = engine
        .submit_batch(
            DeviceId::random(),
            vec![fieldsync_core::SyncDelta::from_dto(create(&zone, "north"))],
        )
        .unwrap();
    let size = inner.size().unwrap();

    faults.crash_after(8);
    let err = engine.process_batch(batch_id).unwrap_err();

    assert!(matches!(err, CoreError::Storage(_)));
    assert!(err.is_retryable());
    assert_eq!(inner.size().unwrap(), size);
    assert_eq!(engine.get_batch(batch_id).unwrap().status, BatchStatus::Pending);
    assert_eq!(engine.version_of(&zone), SyncVersion::UNVERSIONED);

    faults.heal();
    engine.process_batch(batch_id).unwrap();
    drop(engine);

    let reopened = SyncEngine::open(Config::default(), Box::new(inner)).unwrap();
    assert_eq!(reopened.version_of(&zone), SyncVersion::new(1));
}

#[test]
fn failed_flush_rolls_back_resolution() {
    let inner = InMemoryBackend::new();
    let (engine, faults) = engine_over(&inner);
    let photo = entity("photo");
    engine
        .process_sync_batch(DeviceId::random(), vec![create(&photo, "first")])
        .unwrap();
    let conflict_id = engine
        .process_sync_batch(DeviceId::random(), vec![create(&photo, "second")])
        .unwrap()
        .conflicts[0]
        .id;

    faults.fail_flushes(true);
    assert!(engine
        .resolve_conflict(conflict_id, ResolutionStrategy::ClientWins, None)
        .is_err());
    assert_eq!(engine.version_of(&photo), SyncVersion::new(1));
    assert_eq!(engine.stats().open_conflicts, 1);

    faults.heal();
    engine
        .resolve_conflict(conflict_id, ResolutionStrategy::ClientWins, None)
        .unwrap();
    assert_eq!(engine.version_of(&photo), SyncVersion::new(2));
    assert!(faults.fault_count() >= 1);
}

#[test]
fn failed_submission_is_not_replayed() {
    let inner = InMemoryBackend::new();
    let (engine, faults) = engine_over(&inner);

    faults.fail_appends(true);
    assert!(engine
        .process_sync_batch(DeviceId::random(), vec![create(&entity("zone"), "x")])
        .is_err());
    assert_eq!(engine.stats().batches, 0);
    drop(engine);

    let reopened = SyncEngine::open(Config::default(), Box::new(inner)).unwrap();
    assert_eq!(reopened.stats().batches, 0);
}
