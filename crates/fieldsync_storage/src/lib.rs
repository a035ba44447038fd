//! # Fieldsync Storage
//!
//! Append-only byte stores that back the fieldsync journal.
//!
//! Backends are **opaque**: they know nothing about journal records, batches
//! or versions. The engine in `fieldsync_core` owns every byte of format
//! interpretation and only asks a backend to read, append, flush and
//! truncate.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral servers
//! - [`FileBackend`] - For persistent journals; one locked writer per file
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"journal record").unwrap();
//! let data = backend.read_at(offset, 14).unwrap();
//! assert_eq!(&data, b"journal record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{lock_path, FileBackend, LOCK_SUFFIX};
pub use memory::InMemoryBackend;
