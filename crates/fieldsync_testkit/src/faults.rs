//! Fault injection for storage backends.
//!
//! [`FailingBackend`] wraps an [`InMemoryBackend`] and fails on command:
//! every append while a switch is on, or a partial write once a byte budget
//! runs out (a torn record, as a crash mid-write would leave).

use fieldsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct FaultState {
    fail_appends: AtomicBool,
    fail_flushes: AtomicBool,
    byte_budget: AtomicU64,
    faults: AtomicU64,
}

/// Shared switches controlling a [`FailingBackend`].
#[derive(Debug, Clone)]
pub struct FaultHandle {
    state: Arc<FaultState>,
}

impl FaultHandle {
    /// Makes every append fail (or succeed again).
    pub fn fail_appends(&self, on: bool) {
        self.state.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Makes every flush fail (or succeed again).
    pub fn fail_flushes(&self, on: bool) {
        self.state.fail_flushes.store(on, Ordering::SeqCst);
    }

    /// Lets `bytes` more bytes through, then writes a partial record and fails.
    pub fn crash_after(&self, bytes: u64) {
        self.state.byte_budget.store(bytes, Ordering::SeqCst);
    }

    /// Removes all faults.
    pub fn heal(&self) {
        self.fail_appends(false);
        self.fail_flushes(false);
        self.state.byte_budget.store(u64::MAX, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    pub fn fault_count(&self) -> u64 {
        self.state.faults.load(Ordering::SeqCst)
    }
}

/// A storage backend that fails when told to.
#[derive(Debug)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    state: Arc<FaultState>,
}

impl FailingBackend {
    /// Wraps `inner`; clones of `inner` observe every byte written.
    pub fn new(inner: InMemoryBackend) -> (Self, FaultHandle) {
        let state = Arc::new(FaultState {
            fail_appends: AtomicBool::new(false),
            fail_flushes: AtomicBool::new(false),
            byte_budget: AtomicU64::new(u64::MAX),
            faults: AtomicU64::new(0),
        });
        let handle = FaultHandle {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, handle)
    }

    fn fault(&self, message: &str) -> StorageError {
        self.state.faults.fetch_add(1, Ordering::SeqCst);
        StorageError::Unavailable(message.to_string())
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.fail_appends.load(Ordering::SeqCst) {
            return Err(self.fault("injected append failure"));
        }

        let budget = self.state.byte_budget.load(Ordering::SeqCst);
        let len = data.len() as u64;
        if len > budget {
            // Leave a torn record behind, as a crash mid-write would.
            let partial = usize::try_from(budget).unwrap_or(data.len());
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            self.state.byte_budget.store(0, Ordering::SeqCst);
            return Err(self.fault("simulated crash during write"));
        }
        if budget != u64::MAX {
            self.state.byte_budget.store(budget - len, Ordering::SeqCst);
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_flushes.load(Ordering::SeqCst) {
            return Err(self.fault("injected flush failure"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}
