//! # Fieldsync Core
//!
//! Synchronization and conflict-resolution engine for offline-first field
//! devices.
//!
//! This crate provides:
//! - Version store: authoritative current version and payload per entity
//! - Batch processor: per-delta optimistic concurrency, partial success
//! - Conflict resolver: `ClientWins`, `ServerWins`, `ManualMerge`
//! - Change feed: incremental pull of other devices' changes
//! - Commit journal for durability and replay on open
//!
//! ## Guarantees
//!
//! - A delta applies only if its base version equals the stored version;
//!   otherwise it becomes a conflict record and the store is untouched
//! - Read-decide-write on one entity is serialized; different entities
//!   proceed in parallel
//! - Processing and resolution each commit as a single journal record, or
//!   not at all
//! - A batch is processed at most once; a conflict resolves exactly once
//! - Events reach subscribers only after their unit of work committed

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batch;
mod cancel;
mod change_feed;
mod clock;
mod config;
mod conflict;
mod engine;
mod error;
mod events;
pub mod journal;
mod locks;
mod processor;
mod resolver;
pub mod rules;
mod store;
mod uow;
mod version_store;

pub use batch::{SyncBatch, SyncDelta};
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use conflict::{ConflictLedger, ConflictRecord};
pub use engine::{BatchView, EngineStats, SyncEngine};
pub use error::{CoreError, CoreResult};
pub use events::{EventBus, SyncEvent};
pub use journal::{Journal, JournalStats};
pub use processor::BatchOutcome;
pub use resolver::Resolution;
pub use rules::RuleViolation;
pub use version_store::{EntityVersionRecord, VersionStore};
