//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines, building
//! deltas and reaching common states.

use fieldsync_core::{Config, SyncEngine};
use fieldsync_protocol::{DeltaDto, DeltaOperation, EntityReference, SyncVersion};
use fieldsync_storage::FileBackend;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: SyncEngine,
    config: Config,
    journal: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates a new in-memory test engine.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates an in-memory test engine with `config`.
    pub fn memory_with(config: Config) -> Self {
        let engine = SyncEngine::open(
            config.clone(),
            Box::new(fieldsync_storage::InMemoryBackend::new()),
        )
        .expect("Failed to open in-memory engine");
        Self {
            engine,
            config,
            journal: None,
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test engine.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a file-backed test engine with `config`.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let journal = temp_dir.path().join("sync").join("journal.fsj");
        let engine = open_file(&config, &journal, true);

        Self {
            engine,
            config,
            journal: Some(journal),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the journal path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    /// Closes the engine and opens it again from its journal.
    ///
    /// # Panics
    ///
    /// Panics for in-memory engines, which have nothing to replay.
    pub fn reopen(self) -> Self {
        let Self {
            engine,
            config,
            journal,
            _temp_dir,
        } = self;
        let journal = journal.expect("Only file-backed engines can be reopened");
        drop(engine);

        Self {
            engine: open_file(&config, &journal, false),
            config,
            journal: Some(journal),
            _temp_dir,
        }
    }
}

fn open_file(config: &Config, journal: &Path, create_dirs: bool) -> SyncEngine {
    let backend = if create_dirs {
        FileBackend::open_with_create_dirs(journal)
    } else {
        FileBackend::open(journal)
    }
    .expect("Failed to open journal backend");
    SyncEngine::open(config.clone(), Box::new(backend)).expect("Failed to open file engine")
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with a temporary in-memory engine.
///
/// # Example
///
/// ```rust
/// use fieldsync_testkit::{create, entity, with_temp_engine};
/// use fieldsync_protocol::DeviceId;
///
/// with_temp_engine(|engine| {
///     let outcome = engine
///         .process_sync_batch(DeviceId::random(), vec![create(&entity("zone"), "north")])
///         .unwrap();
///     assert!(outcome.is_clean());
/// });
/// ```
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&SyncEngine) -> R,
{
    let test_engine = TestEngine::memory();
    f(&test_engine.engine)
}

/// Runs a test with a temporary file-backed engine.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&SyncEngine, &Path) -> R,
{
    let test_engine = TestEngine::file();
    let path = test_engine
        .path()
        .expect("File engine should have a path")
        .to_path_buf();
    f(&test_engine.engine, &path)
}

/// A fresh entity of the given type.
pub fn entity(entity_type: &str) -> EntityReference {
    EntityReference::new(entity_type, Uuid::new_v4())
}

/// A `Create` delta against an unversioned entity.
pub fn create(entity: &EntityReference, payload: &str) -> DeltaDto {
    DeltaDto::new(
        entity.clone(),
        DeltaOperation::Create,
        SyncVersion::UNVERSIONED,
        payload,
    )
}

/// An `Update` delta based on `base`.
pub fn update(entity: &EntityReference, base: u64, payload: &str) -> DeltaDto {
    DeltaDto::new(
        entity.clone(),
        DeltaOperation::Update,
        SyncVersion::new(base),
        payload,
    )
}

/// A `Delete` delta based on `base`, with an empty payload.
pub fn delete(entity: &EntityReference, base: u64) -> DeltaDto {
    DeltaDto::new(
        entity.clone(),
        DeltaOperation::Delete,
        SyncVersion::new(base),
        "",
    )
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use fieldsync_protocol::DeviceId;

    /// Creates an engine with `entity_count` entities at version 1.
    pub fn populated_engine(entity_count: usize) -> (TestEngine, Vec<EntityReference>) {
        let test_engine = TestEngine::memory();
        let entities: Vec<EntityReference> =
            (0..entity_count).map(|_| entity("measurement")).collect();
        let deltas = entities
            .iter()
            .enumerate()
            .map(|(i, e)| create(e, &format!(r#"{{"index":{}}}"#, i)))
            .collect();

        test_engine
            .process_sync_batch(DeviceId::random(), deltas)
            .expect("Failed to populate engine");

        (test_engine, entities)
    }

    /// Creates an engine holding one open conflict.
    ///
    /// Returns the engine, the contested entity (at version 1, payload
    /// `"server"`) and the conflict id (client payload `"client"`).
    pub fn conflicted_engine() -> (TestEngine, EntityReference, Uuid) {
        let test_engine = TestEngine::memory();
        let contested = entity("installation");

        test_engine
            .process_sync_batch(DeviceId::random(), vec![create(&contested, "server")])
            .expect("Failed to apply first write");
        let outcome = test_engine
            .process_sync_batch(DeviceId::random(), vec![create(&contested, "client")])
            .expect("Failed to submit conflicting write");
        let conflict_id = outcome.conflicts[0].id;

        (test_engine, contested, conflict_id)
    }
}
