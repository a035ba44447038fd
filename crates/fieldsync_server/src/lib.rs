//! # Fieldsync Server
//!
//! Sync boundary for the fieldsync engine.
//!
//! This crate provides:
//! - Request handlers for the four sync operations (push a batch, resolve a
//!   conflict, pull changes, list conflicts) plus batch status lookups
//! - Request limits: delta count per push, page size per pull
//! - `SyncMessage` dispatch over decoded messages or raw CBOR bytes
//! - Per-device session tracking (pushes, last pull cursor)
//!
//! # Protocol
//!
//! Devices push then pull:
//! 1. Device pushes its local deltas; the reply lists applied and conflicting deltas
//! 2. Conflicts are resolved by an operator or by the configured policy
//! 3. Device pulls changes since its last cursor, excluding its own writes
//!
//! Transport (HTTP routing, authentication) belongs to the embedding
//! application.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{DeviceSession, HandlerContext, RequestHandler};
pub use server::SyncServer;
