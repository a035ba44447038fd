//! Concurrent processing and resolution.

use fieldsync_core::{CoreError, RuleViolation, SyncEngine};
use fieldsync_protocol::{
    DeltaDto, DeltaOperation, DeviceId, EntityReference, ResolutionStrategy, SyncVersion,
};
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

const THREADS: usize = 8;

#[test]
fn same_base_version_admits_exactly_one_writer() {
    let engine = Arc::new(SyncEngine::open_in_memory().unwrap());
    let entity = EntityReference::new("installation", Uuid::new_v4());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let entity = entity.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let dto = DeltaDto::new(
                    entity,
                    DeltaOperation::Create,
                    SyncVersion::UNVERSIONED,
                    format!("device {i}"),
                );
                barrier.wait();
                engine.process_sync_batch(DeviceId::random(), vec![dto]).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let applied: usize = outcomes.iter().map(|o| o.applied_count).sum();
    let conflicts: usize = outcomes.iter().map(|o| o.conflict_count).sum();

    assert_eq!(applied, 1);
    assert_eq!(conflicts, THREADS - 1);
    assert_eq!(engine.version_of(&entity), SyncVersion::new(1));
}

#[test]
fn chained_writers_never_lose_updates() {
    let engine = Arc::new(SyncEngine::open_in_memory().unwrap());
    let entity = EntityReference::new("zone", Uuid::new_v4());
    let rounds = 25;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let entity = entity.clone();
            thread::spawn(move || {
                let device = DeviceId::random();
                let mut applied = 0;
                for _ in 0..rounds {
                    let base = engine.version_of(&entity);
                    let op = if base.is_unversioned() {
                        DeltaOperation::Create
                    } else {
                        DeltaOperation::Update
                    };
                    let dto = DeltaDto::new(entity.clone(), op, base, "x");
                    applied += engine.process_sync_batch(device, vec![dto]).unwrap().applied_count;
                }
                applied
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(engine.version_of(&entity), SyncVersion::new(total as u64));
}

#[test]
fn concurrent_resolutions_of_one_conflict_succeed_once() {
    let engine = Arc::new(SyncEngine::open_in_memory().unwrap());
    let entity = EntityReference::new("photo", Uuid::new_v4());
    let create = |payload: &str| {
        DeltaDto::new(
            entity.clone(),
            DeltaOperation::Create,
            SyncVersion::UNVERSIONED,
            payload,
        )
    };
    engine
        .process_sync_batch(DeviceId::random(), vec![create("first")])
        .unwrap();
    let conflict_id = engine
        .process_sync_batch(DeviceId::random(), vec![create("second")])
        .unwrap()
        .conflicts[0]
        .id;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.resolve_conflict(conflict_id, ResolutionStrategy::ClientWins, None)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for result in results.into_iter().filter_map(Result::err) {
        assert!(matches!(
            result,
            CoreError::Rule(RuleViolation::ConflictAlreadyResolved { .. })
        ));
    }
    assert_eq!(engine.version_of(&entity), SyncVersion::new(2));
}

#[test]
fn one_batch_is_processed_once_under_contention() {
    let engine = Arc::new(SyncEngine::open_in_memory().unwrap());
    let entity = EntityReference::new("zone", Uuid::new_v4());
    let batch_id = engine
        .submit_batch(
            DeviceId::random(),
            vec![fieldsync_core::SyncDelta::from_dto(DeltaDto::new(
                entity.clone(),
                DeltaOperation::Create,
                SyncVersion::UNVERSIONED,
                "x",
            ))],
        )
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.process_batch(batch_id)
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(successes, 1);
    assert_eq!(engine.version_of(&entity), SyncVersion::new(1));
}
