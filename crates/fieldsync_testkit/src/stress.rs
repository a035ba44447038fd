//! Stress tests for the sync engine.
//!
//! These drive one engine from many threads and check that versions and
//! conflicts add up afterwards.

use crate::fixtures::{create, update};
use fieldsync_core::SyncEngine;
use fieldsync_protocol::{DeviceId, EntityReference, ResolutionStrategy, SyncVersion};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Deltas applied.
    pub applied: usize,
    /// Conflicts raised.
    pub conflicts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            applied: 0,
            conflicts: 0,
            duration,
            ops_per_second,
        }
    }

    fn with_counts(mut self, applied: usize, conflicts: usize) -> Self {
        self.applied = applied;
        self.conflicts = conflicts;
        self
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Applied: {}", self.applied);
        println!("Conflicts: {}", self.conflicts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Batches each thread pushes.
    pub operations: usize,
    /// Number of concurrent threads (one device each).
    pub threads: usize,
    /// Number of distinct entities the threads contend on.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            entity_count: 8,
        }
    }
}

#[derive(Default)]
struct Counters {
    successful: AtomicUsize,
    failed: AtomicUsize,
    applied: AtomicUsize,
    conflicts: AtomicUsize,
}

impl Counters {
    fn result(&self, duration: Duration) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
            duration,
        )
        .with_counts(
            self.applied.load(Ordering::SeqCst),
            self.conflicts.load(Ordering::SeqCst),
        )
    }
}

/// Every thread repeatedly reads an entity's version and pushes an update
/// based on it, so pushes race on the same entities.
///
/// Returns the run result and the contended entities. Afterwards the sum of
/// entity versions equals `result.applied`.
pub fn stress_contended_pushes(
    engine: Arc<SyncEngine>,
    config: &StressConfig,
) -> (StressTestResult, Vec<EntityReference>) {
    let entities: Arc<Vec<EntityReference>> = Arc::new(
        (0..config.entity_count.max(1))
            .map(|_| EntityReference::new("measurement", Uuid::new_v4()))
            .collect(),
    );
    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(config.threads.max(1)));
    let operations = config.operations;

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads.max(1))
        .map(|t| {
            let engine = Arc::clone(&engine);
            let entities = Arc::clone(&entities);
            let counters = Arc::clone(&counters);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let device = DeviceId::random();
                barrier.wait();
                for i in 0..operations {
                    let entity = &entities[(t + i) % entities.len()];
                    let base = engine.version_of(entity);
                    let payload = format!(r#"{{"thread":{t},"op":{i}}}"#);
                    let delta = if base.is_unversioned() {
                        create(entity, &payload)
                    } else {
                        update(entity, base.get(), &payload)
                    };

                    match engine.process_sync_batch(device, vec![delta]) {
                        Ok(outcome) => {
                            counters.successful.fetch_add(1, Ordering::SeqCst);
                            counters
                                .applied
                                .fetch_add(outcome.applied_count, Ordering::SeqCst);
                            counters
                                .conflicts
                                .fetch_add(outcome.conflict_count, Ordering::SeqCst);
                        }
                        Err(_) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    let result = counters.result(start.elapsed());
    let entities = Arc::try_unwrap(entities).unwrap_or_else(|shared| (*shared).clone());
    (result, entities)
}

/// Resolves every open conflict from `threads` threads at once, each
/// thread trying every conflict.
///
/// Each conflict resolves exactly once: `successful_ops` is the number of
/// conflicts, the rest are counted as failed.
pub fn stress_concurrent_resolutions(
    engine: Arc<SyncEngine>,
    threads: usize,
    strategy: ResolutionStrategy,
) -> StressTestResult {
    let conflict_ids: Arc<Vec<Uuid>> = Arc::new(
        engine
            .get_conflicts(None, Some(fieldsync_protocol::ConflictStatus::Unresolved))
            .into_iter()
            .map(|c| c.id)
            .collect(),
    );
    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(threads.max(1)));

    let start = Instant::now();
    let handles: Vec<_> = (0..threads.max(1))
        .map(|t| {
            let engine = Arc::clone(&engine);
            let conflict_ids = Arc::clone(&conflict_ids);
            let counters = Arc::clone(&counters);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                // Start at different offsets so threads collide mid-list.
                for i in 0..conflict_ids.len() {
                    let id = conflict_ids[(t + i) % conflict_ids.len()];
                    let merged = strategy.requires_payload().then(|| "merged".into());
                    match engine.resolve_conflict(id, strategy, merged) {
                        Ok(resolution) => {
                            counters.successful.fetch_add(1, Ordering::SeqCst);
                            if resolution.written_version.is_some() {
                                counters.applied.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        Err(_) => {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    counters.result(start.elapsed())
}

/// Sum of the current versions of `entities`.
pub fn total_versions(engine: &SyncEngine, entities: &[EntityReference]) -> u64 {
    entities
        .iter()
        .map(|e| engine.version_of(e))
        .map(SyncVersion::get)
        .sum()
}
