//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{DeviceSession, HandlerContext, RequestHandler};
use fieldsync_core::{EngineStats, SyncEngine};
use fieldsync_protocol::{DeviceId, SyncMessage};
use fieldsync_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tracing::{info, warn};

/// The sync server.
///
/// Owns a [`SyncEngine`] and answers [`SyncMessage`] requests against it.
/// Transport is left to the embedding application: it hands decoded
/// messages (or raw CBOR bytes) to [`SyncServer::handle_message`] or
/// [`SyncServer::handle_bytes`] and sends back what they return.
///
/// # Example
///
/// ```
/// use fieldsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default()).unwrap();
/// assert_eq!(server.stats().batches, 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server over an empty in-memory journal.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::open(config, Box::new(InMemoryBackend::new()))
    }

    /// Creates a server over `backend`, replaying its journal.
    pub fn open(config: ServerConfig, backend: Box<dyn StorageBackend>) -> ServerResult<Self> {
        let engine = Arc::new(SyncEngine::open(config.engine.clone(), backend)?);
        let server = Self::with_engine(config, engine);
        info!(entities = server.stats().entities, "sync server ready");
        Ok(server)
    }

    /// Creates a server sharing an existing engine.
    pub fn with_engine(config: ServerConfig, engine: Arc<SyncEngine>) -> Self {
        let context = Arc::new(HandlerContext::new(config, engine));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Dispatches a request message, mapping failures to
    /// [`SyncMessage::Error`].
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        let type_code = message.type_code();
        match self.dispatch(message) {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_server_error() {
                    warn!(type_code, error = %err, "request failed");
                }
                SyncMessage::Error(err.to_response())
            }
        }
    }

    /// Decodes a CBOR request, handles it and encodes the reply.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the reply cannot be encoded. Undecodable
    /// requests are answered with an encoded error message.
    pub fn handle_bytes(&self, bytes: &[u8]) -> ServerResult<Vec<u8>> {
        let reply = match SyncMessage::decode(bytes) {
            Ok(message) => self.handle_message(message),
            Err(err) => SyncMessage::Error(ServerError::from(err).to_response()),
        };
        Ok(reply.encode()?)
    }

    fn dispatch(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::ProcessBatchRequest(req) => self
                .handler
                .handle_process_batch(req)
                .map(SyncMessage::ProcessBatchResponse),
            SyncMessage::ResolveConflictRequest(req) => self
                .handler
                .handle_resolve(req)
                .map(SyncMessage::ResolveConflictResponse),
            SyncMessage::ChangesRequest(req) => self
                .handler
                .handle_changes(req)
                .map(SyncMessage::ChangesResponse),
            SyncMessage::ConflictsRequest(req) => self
                .handler
                .handle_conflicts(req)
                .map(SyncMessage::ConflictsResponse),
            SyncMessage::BatchStatusRequest(req) => self
                .handler
                .handle_batch_status(req)
                .map(SyncMessage::BatchStatusResponse),
            other => Err(ServerError::UnexpectedMessage(other.type_code())),
        }
    }

    /// The request handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// The engine behind the server.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.context.engine
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// What the server has seen from one device.
    pub fn session(&self, device_id: &DeviceId) -> Option<DeviceSession> {
        self.context.session(device_id)
    }

    /// Engine-wide counters.
    pub fn stats(&self) -> EngineStats {
        self.context.engine.stats()
    }
}
