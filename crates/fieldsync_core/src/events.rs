//! Post-commit domain events.
//!
//! Aggregates collect [`SyncEvent`]s while they are mutated. The unit of work
//! hands them to the [`EventBus`] only after its journal record is durable,
//! so subscribers never observe effects that were rolled back.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = SyncEngine::open_in_memory()?;
//! let events = engine.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{event:?}");
//!     }
//! });
//! ```

use fieldsync_protocol::{BatchStatus, DeviceId, EntityReference, ResolutionStrategy, SyncVersion};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

/// Something that happened inside a committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A batch was accepted as `Pending`.
    BatchSubmitted {
        /// The batch.
        batch_id: Uuid,
        /// Submitting device.
        device_id: DeviceId,
        /// Number of deltas.
        delta_count: usize,
    },
    /// A delta advanced its entity.
    DeltaApplied {
        /// The batch.
        batch_id: Uuid,
        /// The entity.
        entity_ref: EntityReference,
        /// Version written.
        version: SyncVersion,
    },
    /// A delta was stale.
    ConflictDetected {
        /// The batch.
        batch_id: Uuid,
        /// New conflict.
        conflict_id: Uuid,
        /// The entity.
        entity_ref: EntityReference,
    },
    /// A batch reached `Completed` or `PartialConflict`.
    BatchProcessed {
        /// The batch.
        batch_id: Uuid,
        /// Terminal status.
        status: BatchStatus,
        /// Applied deltas.
        applied: usize,
        /// Conflicting deltas.
        conflicts: usize,
    },
    /// A batch was marked `Failed`.
    BatchFailed {
        /// The batch.
        batch_id: Uuid,
        /// Why.
        reason: String,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// The conflict.
        conflict_id: Uuid,
        /// Strategy applied.
        strategy: ResolutionStrategy,
        /// Version written, `None` for `ServerWins`.
        written_version: Option<SyncVersion>,
    },
}

impl SyncEvent {
    /// The batch this event belongs to, if it names one.
    pub fn batch_id(&self) -> Option<Uuid> {
        match self {
            SyncEvent::BatchSubmitted { batch_id, .. }
            | SyncEvent::DeltaApplied { batch_id, .. }
            | SyncEvent::ConflictDetected { batch_id, .. }
            | SyncEvent::BatchProcessed { batch_id, .. }
            | SyncEvent::BatchFailed { batch_id, .. } => Some(*batch_id),
            SyncEvent::ConflictResolved { .. } => None,
        }
    }
}

/// Distributes committed events to subscribers in commit order.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for every event published from now on.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes the events of one commit.
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&self, events: Vec<SyncEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted() -> SyncEvent {
        SyncEvent::BatchSubmitted {
            batch_id: Uuid::new_v4(),
            device_id: DeviceId::random(),
            delta_count: 1,
        }
    }

    #[test]
    fn every_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        let first = submitted();
        let second = submitted();

        bus.publish(vec![first.clone(), second.clone()]);

        assert_eq!(a.recv().unwrap(), first);
        assert_eq!(a.recv().unwrap(), second);
        assert_eq!(b.try_iter().count(), 2);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(vec![submitted()]);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn resolution_events_name_no_batch() {
        let event = SyncEvent::ConflictResolved {
            conflict_id: Uuid::new_v4(),
            strategy: ResolutionStrategy::ServerWins,
            written_version: None,
        };
        assert_eq!(event.batch_id(), None);
        assert!(submitted().batch_id().is_some());
    }
}
