//! Verification dispatcher
//!
//! Routes one captured code either to the verification service or, when
//! the service cannot be reached, into the offline queue. The caller gets
//! a [`ScanResult`] it can display; the queue absorbs every failure that
//! left the device without a server answer.

use super::network::{Connectivity, ConnectivityMonitor, NetworkQuality, TimeoutTable};
use super::queue::{OfflineQueue, OfflineScanEntry, QueueError, ScanId};
use super::sync::{SyncHandle, SyncTrigger};
use super::transport::{TransportError, VerifyTransport};
use crate::core_ledger::{EventId, ParticipantCode};
use crate::core_verify::{ServerReply, VerifiedData};
use crate::metrics::{DISPATCH_DURATION_MS, DISPATCH_OFFLINE, DISPATCH_ONLINE, QUEUE_PENDING, Timer};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do when the server answers `INTERNAL_ERROR` (or a bare 5xx)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalErrorPolicy {
    /// Show the error to the operator; nothing is queued
    #[default]
    Surface,
    /// Treat it like lost connectivity and queue the scan for replay
    QueueOffline,
}

/// Result shown to the operator for one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Verified(VerifiedData),
    Duplicate { original: Option<VerifiedData>, message: String },
    NotFound,
    EventArchived,
    EventNotFound,
    SavedOffline { scan_id: ScanId, captured_at: DateTime<Utc> },
}

impl ScanResult {
    pub fn status(&self) -> &'static str {
        match self {
            ScanResult::Verified(_) => "verified",
            ScanResult::Duplicate { .. } => "duplicate",
            ScanResult::NotFound => "not_found",
            ScanResult::EventArchived => "archived",
            ScanResult::EventNotFound => "event_not_found",
            ScanResult::SavedOffline { .. } => "offline",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ScanResult::Verified(data) => format!("{} verified", data.name),
            ScanResult::Duplicate { message, .. } => message.clone(),
            ScanResult::NotFound => "Participant not registered for this event".to_string(),
            ScanResult::EventArchived => "Event is archived".to_string(),
            ScanResult::EventNotFound => "Event not found".to_string(),
            ScanResult::SavedOffline { .. } => "Saved offline, will sync when connected".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid participant code: {0}")]
    InvalidInput(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Verification service error: {0}")]
    Server(String),

    #[error("Could not save scan offline: {0}")]
    Queue(#[from] QueueError),
}

/// How one queued scan fared on replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The server holds a record for the participant
    Confirmed(ServerReply),
    /// The server will never accept this scan
    Rejected(ServerReply),
    /// Try again on a later sweep
    Pending(String),
}

pub struct VerificationDispatcher {
    transport: Arc<dyn VerifyTransport>,
    queue: Arc<OfflineQueue>,
    connectivity: ConnectivityMonitor,
    timeouts: TimeoutTable,
    policy: InternalErrorPolicy,
    sync: Option<SyncHandle>,
}

impl VerificationDispatcher {
    pub fn new(
        transport: Arc<dyn VerifyTransport>,
        queue: Arc<OfflineQueue>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            transport,
            queue,
            connectivity,
            timeouts: TimeoutTable::default(),
            policy: InternalErrorPolicy::default(),
            sync: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutTable) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_policy(mut self, policy: InternalErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ask the sync coordinator for a sweep whenever the server is reachable
    /// and scans are still queued
    pub fn with_sync(mut self, handle: SyncHandle) -> Self {
        self.sync = Some(handle);
        self
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Verify `raw_code` online, or queue it when the server is unreachable
    pub async fn dispatch(&self, event_id: &EventId, raw_code: &str) -> Result<ScanResult, DispatchError> {
        let code =
            ParticipantCode::parse(raw_code).map_err(|e| DispatchError::InvalidInput(e.to_string()))?;
        let captured_at = Utc::now();

        let attempt = match self.connectivity.current() {
            Connectivity::Offline => Err(TransportError::Offline),
            Connectivity::Online(quality) => self.call(event_id, &code, quality).await,
        };

        match attempt {
            Ok(ServerReply::Internal(message)) if self.policy == InternalErrorPolicy::QueueOffline => {
                self.save_offline(event_id, code, captured_at, &message).await
            }
            Ok(reply) => {
                counter!(DISPATCH_ONLINE).increment(1);
                self.on_reply(event_id, &code, reply).await
            }
            Err(e) if self.should_queue(&e) => {
                self.save_offline(event_id, code, captured_at, &e.to_string()).await
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Verification failed");
                Err(DispatchError::Server(e.to_string()))
            }
        }
    }

    /// Resend one queued scan. Never touches the queue itself.
    pub async fn replay(&self, entry: &OfflineScanEntry) -> ReplayOutcome {
        let quality = match self.connectivity.current() {
            Connectivity::Offline => return ReplayOutcome::Pending(TransportError::Offline.to_string()),
            Connectivity::Online(quality) => quality,
        };

        match self.call(&entry.event_id, &entry.participant_code, quality).await {
            Ok(reply) if reply.confirms_attendance() => ReplayOutcome::Confirmed(reply),
            Ok(
                reply @ (ServerReply::ParticipantNotFound
                | ServerReply::EventArchived
                | ServerReply::EventNotFound
                | ServerReply::InvalidInput(_)),
            ) => ReplayOutcome::Rejected(reply),
            Ok(ServerReply::Unauthorized(message)) => {
                ReplayOutcome::Pending(format!("unauthorized: {}", message))
            }
            Ok(ServerReply::Internal(message)) => ReplayOutcome::Pending(message),
            Ok(other) => ReplayOutcome::Pending(format!("unexpected reply {:?}", other)),
            Err(e) => ReplayOutcome::Pending(e.to_string()),
        }
    }

    fn should_queue(&self, err: &TransportError) -> bool {
        err.is_connectivity()
            || (self.policy == InternalErrorPolicy::QueueOffline
                && matches!(err, TransportError::Server { .. }))
    }

    async fn call(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
        quality: NetworkQuality,
    ) -> Result<ServerReply, TransportError> {
        let timeout = self.timeouts.for_quality(quality);
        let timer = Timer::new(DISPATCH_DURATION_MS);
        let result = guarded(timeout, self.transport.verify(event_id, code, timeout)).await;
        let elapsed_ms = timer.stop();
        debug!(event_id = %event_id, %quality, elapsed_ms, ok = result.is_ok(), "Verification call finished");
        result
    }

    async fn on_reply(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
        reply: ServerReply,
    ) -> Result<ScanResult, DispatchError> {
        let result = match reply {
            ServerReply::Verified(data) => {
                match self.queue.prune_confirmed(event_id, code).await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Pruned superseded offline entries"),
                    Err(e) => warn!("Failed to prune offline queue: {}", e),
                }
                ScanResult::Verified(data)
            }
            ServerReply::Duplicate { original, message } => ScanResult::Duplicate { original, message },
            ServerReply::ParticipantNotFound => ScanResult::NotFound,
            ServerReply::EventArchived => ScanResult::EventArchived,
            ServerReply::EventNotFound => ScanResult::EventNotFound,
            ServerReply::Unauthorized(message) => return Err(DispatchError::Unauthorized(message)),
            ServerReply::InvalidInput(message) => return Err(DispatchError::InvalidInput(message)),
            ServerReply::Internal(message) => return Err(DispatchError::Server(message)),
        };

        self.request_sync_if_pending().await;
        Ok(result)
    }

    async fn save_offline(
        &self,
        event_id: &EventId,
        code: ParticipantCode,
        captured_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ScanResult, DispatchError> {
        let entry = OfflineScanEntry::new(event_id.clone(), code, captured_at);
        self.queue.enqueue(&entry).await?;
        counter!(DISPATCH_OFFLINE).increment(1);
        info!(scan_id = %entry.id, event_id = %event_id, reason, "Scan saved offline");

        if let Ok(pending) = self.queue.pending_count().await {
            gauge!(QUEUE_PENDING).set(pending as f64);
        }
        Ok(ScanResult::SavedOffline { scan_id: entry.id, captured_at })
    }

    async fn request_sync_if_pending(&self) {
        let Some(sync) = &self.sync else { return };
        match self.queue.pending_count().await {
            Ok(0) => {}
            Ok(pending) => {
                debug!(pending, "Server reachable with scans queued, requesting sync");
                sync.request(SyncTrigger::Reachable);
            }
            Err(e) => warn!("Could not read offline queue size: {}", e),
        }
    }
}

/// Bound a call by `timeout` regardless of what the transport enforces
async fn guarded<F>(timeout: Duration, call: F) -> Result<ServerReply, TransportError>
where
    F: std::future::Future<Output = Result<ServerReply, TransportError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}
