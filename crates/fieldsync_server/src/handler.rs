//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use fieldsync_core::SyncEngine;
use fieldsync_protocol::{
    BatchStatusRequest, BatchStatusResponse, ChangesRequest, ChangesResponse, ConflictDto,
    ConflictsRequest, DeviceId, ProcessBatchRequest, ProcessBatchResponse,
    ResolveConflictRequest, ResolveConflictResponse,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Engine shared across all handlers.
    pub engine: Arc<SyncEngine>,
    sessions: RwLock<HashMap<DeviceId, DeviceSession>>,
}

/// What the server has seen from one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSession {
    /// Batches the device has pushed.
    pub batches_pushed: usize,
    /// Cursor handed out on the device's last pull.
    pub last_cursor: Option<DateTime<Utc>>,
    /// Time of the device's last request.
    pub last_seen: Option<DateTime<Utc>>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, engine: Arc<SyncEngine>) -> Self {
        Self {
            config,
            engine,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Session for a device, if it has made a request.
    pub fn session(&self, device_id: &DeviceId) -> Option<DeviceSession> {
        self.sessions.read().get(device_id).cloned()
    }

    /// Number of devices seen.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn record_push(&self, device_id: DeviceId) {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(device_id).or_default();
        session.batches_pushed += 1;
        session.last_seen = Some(Utc::now());
    }

    fn record_pull(&self, device_id: DeviceId, cursor: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(device_id).or_default();
        session.last_cursor = Some(cursor);
        session.last_seen = Some(Utc::now());
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Submits and processes a batch.
    pub fn handle_process_batch(
        &self,
        request: ProcessBatchRequest,
    ) -> ServerResult<ProcessBatchResponse> {
        let limit = self.context.config.max_push_batch;
        if request.deltas.len() > limit as usize {
            return Err(ServerError::BatchTooLarge {
                count: request.deltas.len(),
                limit,
            });
        }

        let device_id = request.device_id;
        let outcome = self
            .context
            .engine
            .process_sync_batch(device_id, request.deltas)?;
        self.context.record_push(device_id);

        Ok(outcome.to_response())
    }

    /// Resolves one conflict.
    pub fn handle_resolve(
        &self,
        request: ResolveConflictRequest,
    ) -> ServerResult<ResolveConflictResponse> {
        let resolution = self.context.engine.resolve_conflict(
            request.conflict_id,
            request.strategy,
            request.merged_payload,
        )?;
        Ok(resolution.to_response())
    }

    /// Pulls a page of other devices' changes.
    pub fn handle_changes(&self, request: ChangesRequest) -> ServerResult<ChangesResponse> {
        let limit = self.context.config.pull_limit(request.limit);
        let response = self
            .context
            .engine
            .changes_since(&request.device_id, request.since, limit)?;
        debug!(
            device_id = %request.device_id,
            changes = response.changes.len(),
            has_more = response.has_more,
            "changes pulled"
        );
        self.context
            .record_pull(request.device_id, response.server_timestamp);

        Ok(response)
    }

    /// Lists conflicts, optionally for one device and status.
    pub fn handle_conflicts(&self, request: ConflictsRequest) -> ServerResult<Vec<ConflictDto>> {
        Ok(self
            .context
            .engine
            .get_conflicts(request.device_id, request.status))
    }

    /// Reports the status of one batch.
    pub fn handle_batch_status(
        &self,
        request: BatchStatusRequest,
    ) -> ServerResult<BatchStatusResponse> {
        let view = self.context.engine.get_batch(request.batch_id)?;
        Ok(view.to_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::CoreError;
    use fieldsync_protocol::{
        BatchStatus, ConflictStatus, DeltaDto, DeltaOperation, EntityReference,
        ResolutionStrategy, SyncVersion,
    };
    use uuid::Uuid;

    fn create_handler(config: ServerConfig) -> (RequestHandler, Arc<HandlerContext>) {
        let engine = Arc::new(SyncEngine::open_in_memory().unwrap());
        let context = Arc::new(HandlerContext::new(config, engine));
        (RequestHandler::new(Arc::clone(&context)), context)
    }

    fn create(entity: &EntityReference) -> DeltaDto {
        DeltaDto::new(
            entity.clone(),
            DeltaOperation::Create,
            SyncVersion::UNVERSIONED,
            "payload",
        )
    }

    #[test]
    fn push_then_conflict_then_resolve() {
        let (handler, _) = create_handler(ServerConfig::default());
        let entity = EntityReference::new("installation", Uuid::new_v4());

        let first = handler
            .handle_process_batch(ProcessBatchRequest::new(
                DeviceId::random(),
                vec![create(&entity)],
            ))
            .unwrap();
        assert!(first.is_clean());

        let second = handler
            .handle_process_batch(ProcessBatchRequest::new(
                DeviceId::random(),
                vec![create(&entity)],
            ))
            .unwrap();
        assert_eq!(second.conflict_count, 1);

        let ack = handler
            .handle_resolve(ResolveConflictRequest::new(
                second.conflicts[0].id,
                ResolutionStrategy::ClientWins,
            ))
            .unwrap();
        assert_eq!(ack.written_version, Some(SyncVersion::new(2)));

        let open = handler
            .handle_conflicts(ConflictsRequest {
                device_id: None,
                status: Some(ConflictStatus::Unresolved),
            })
            .unwrap();
        assert!(open.is_empty());
    }

    #[test]
    fn oversized_push_is_rejected_before_the_engine() {
        let (handler, context) = create_handler(ServerConfig::default().with_max_push_batch(2));
        let deltas = (0..3)
            .map(|_| create(&EntityReference::new("zone", Uuid::new_v4())))
            .collect();

        let err = handler
            .handle_process_batch(ProcessBatchRequest::new(DeviceId::random(), deltas))
            .unwrap_err();

        assert!(matches!(err, ServerError::BatchTooLarge { count: 3, limit: 2 }));
        assert!(err.is_client_error());
        assert_eq!(context.engine.stats().batches, 0);
    }

    #[test]
    fn empty_push_is_a_rule_violation() {
        let (handler, _) = create_handler(ServerConfig::default());
        let err = handler
            .handle_process_batch(ProcessBatchRequest::new(DeviceId::random(), vec![]))
            .unwrap_err();
        assert!(matches!(err, ServerError::Engine(CoreError::Rule(_))));
        assert_eq!(err.kind(), "rule_violation");
    }

    #[test]
    fn pull_pagination_and_session_cursor() {
        let (handler, context) = create_handler(ServerConfig::default());
        let writer = DeviceId::random();
        let reader = DeviceId::random();
        let deltas = (0..5)
            .map(|_| create(&EntityReference::new("photo", Uuid::new_v4())))
            .collect();
        handler
            .handle_process_batch(ProcessBatchRequest::new(writer, deltas))
            .unwrap();

        let page = handler
            .handle_changes(ChangesRequest::new(reader, None).with_limit(2))
            .unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(page.has_more);

        let page = handler
            .handle_changes(
                ChangesRequest::new(reader, Some(page.server_timestamp)).with_limit(2),
            )
            .unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(page.has_more);

        let page = handler
            .handle_changes(
                ChangesRequest::new(reader, Some(page.server_timestamp)).with_limit(2),
            )
            .unwrap();
        assert_eq!(page.changes.len(), 1);
        assert!(!page.has_more);

        let session = context.session(&reader).unwrap();
        assert_eq!(session.last_cursor, Some(page.server_timestamp));
        assert_eq!(context.session(&writer).unwrap().batches_pushed, 1);
        assert_eq!(context.session_count(), 2);
    }

    #[test]
    fn zero_limit_still_returns_a_change() {
        let (handler, _) = create_handler(ServerConfig::default());
        handler
            .handle_process_batch(ProcessBatchRequest::new(
                DeviceId::random(),
                vec![create(&EntityReference::new("zone", Uuid::new_v4()))],
            ))
            .unwrap();

        let page = handler
            .handle_changes(ChangesRequest::new(DeviceId::random(), None).with_limit(0))
            .unwrap();
        assert_eq!(page.changes.len(), 1);
    }

    #[test]
    fn batch_status_lookup() {
        let (handler, _) = create_handler(ServerConfig::default());
        let response = handler
            .handle_process_batch(ProcessBatchRequest::new(
                DeviceId::random(),
                vec![create(&EntityReference::new("zone", Uuid::new_v4()))],
            ))
            .unwrap();

        let status = handler
            .handle_batch_status(BatchStatusRequest {
                batch_id: response.batch_id,
            })
            .unwrap();
        assert_eq!(status.status, BatchStatus::Completed);
        assert_eq!(status.delta_count, 1);

        let err = handler
            .handle_batch_status(BatchStatusRequest {
                batch_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
