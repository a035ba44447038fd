//! # Fieldsync Protocol
//!
//! Value types and boundary payloads shared by the fieldsync engine, server
//! and tools.
//!
//! This crate provides:
//! - Identity and versioning types ([`EntityReference`], [`SyncVersion`], [`DeviceId`])
//! - Delta types ([`DeltaOperation`], [`DeltaPayload`], [`DeltaDto`])
//! - Conflict types ([`ConflictStatus`], [`ResolutionStrategy`], [`ConflictDto`])
//! - Change feed payloads ([`ChangeDto`], [`ChangesResponse`])
//! - Request/response messages and their CBOR encoding ([`SyncMessage`])
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod codec;
mod conflict;
mod error;
mod messages;
mod types;

pub use change_feed::{ChangeDto, ChangesResponse};
pub use codec::{from_cbor, to_cbor};
pub use conflict::{AutoResolvePolicy, ConflictDto, ConflictStatus, ResolutionStrategy};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BatchStatusRequest, BatchStatusResponse, ChangesRequest, ConflictsRequest, DeltaDto,
    ErrorResponse, ProcessBatchRequest, ProcessBatchResponse, ResolveConflictRequest,
    ResolveConflictResponse, SyncMessage,
};
pub use types::{BatchStatus, DeltaOperation, DeltaPayload, DeviceId, EntityReference, SyncVersion};
