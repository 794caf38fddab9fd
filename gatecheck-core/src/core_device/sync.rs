//! Background sync of the offline queue
//!
//! A sweep reads every unsynced entry from the queue and replays it
//! through the dispatcher. Sweeps never overlap: concurrent triggers wait
//! on a mutex and then find the queue already drained. The coordinator
//! keeps no state between sweeps beyond what the queue persists.

use super::dispatcher::{ReplayOutcome, VerificationDispatcher};
use super::network::Connectivity;
use super::queue::{OfflineQueue, QueueResult, ScanId};
use crate::core_ledger::{EventId, ParticipantCode};
use crate::core_verify::ServerReply;
use crate::metrics::{QUEUE_PENDING, SYNC_REJECTED, SYNC_SWEEPS, SYNC_SYNCED};
use crate::shutdown::ShutdownCoordinator;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Tag under which the platform schedules deferred sync work
pub const SYNC_TAG: &str = "sync-offline-scans";

const TRIGGER_BUFFER: usize = 8;

/// Why a sweep ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Periodic,
    /// Deferred work fired by the platform under [`SYNC_TAG`]
    Platform,
    /// An explicit "sync now" from the foreground
    Manual,
    /// The dispatcher reached the server while scans were queued
    Reachable,
}

/// Foreground to background message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    SyncOfflineScans,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedScan {
    pub scan_id: ScanId,
    pub event_id: EventId,
    pub participant_code: ParticipantCode,
    pub reason: String,
}

/// Per-sweep counts, broadcast to any listening foreground
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub attempted: usize,
    pub synced: usize,
    pub rejected: Vec<RejectedScan>,
    pub pending: usize,
}

impl SyncReport {
    fn new(trigger: SyncTrigger, attempted: usize) -> Self {
        Self { trigger, attempted, synced: 0, rejected: Vec::new(), pending: 0 }
    }
}

/// Sender side of the trigger channel
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncTrigger>,
}

/// Receiver side, consumed by [`SyncCoordinator::spawn`]
pub struct SyncInbox {
    rx: mpsc::Receiver<SyncTrigger>,
}

impl SyncHandle {
    pub fn channel() -> (SyncHandle, SyncInbox) {
        let (tx, rx) = mpsc::channel(TRIGGER_BUFFER);
        (SyncHandle { tx }, SyncInbox { rx })
    }

    /// Queue a trigger. Returns false if the coordinator is gone. A full
    /// channel already holds pending sweeps, so the trigger is coalesced.
    pub fn request(&self, trigger: SyncTrigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?trigger, "Sync already pending, trigger coalesced");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn sync_now(&self) -> bool {
        self.request(SyncTrigger::Manual)
    }

    /// Handle a JSON message posted from the foreground
    pub fn handle_message(&self, raw: &str) -> Result<bool, serde_json::Error> {
        match serde_json::from_str::<SyncMessage>(raw)? {
            SyncMessage::SyncOfflineScans => Ok(self.sync_now()),
        }
    }

    /// Handle a deferred-work callback; other tags are ignored
    pub fn handle_platform_sync(&self, tag: &str) -> bool {
        tag == SYNC_TAG && self.request(SyncTrigger::Platform)
    }
}

pub struct SyncCoordinator {
    dispatcher: Arc<VerificationDispatcher>,
    queue: Arc<OfflineQueue>,
    sweep_lock: Mutex<()>,
    reports: broadcast::Sender<SyncReport>,
}

impl SyncCoordinator {
    pub fn new(dispatcher: Arc<VerificationDispatcher>) -> Self {
        let queue = dispatcher.queue().clone();
        let (reports, _) = broadcast::channel(16);
        Self { dispatcher, queue, sweep_lock: Mutex::new(()), reports }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncReport> {
        self.reports.subscribe()
    }

    /// Replay every unsynced entry once.
    ///
    /// Confirmed entries are marked synced and then purged; terminal
    /// rejections are removed and reported; anything else stays queued.
    pub async fn sweep(&self, trigger: SyncTrigger) -> QueueResult<SyncReport> {
        let _guard = self.sweep_lock.lock().await;
        let entries = self.queue.list_unsynced().await?;
        let mut report = SyncReport::new(trigger, entries.len());
        if entries.is_empty() {
            debug!(?trigger, "Nothing to sync");
            return Ok(report);
        }

        info!(?trigger, count = entries.len(), "Replaying offline scans");
        counter!(SYNC_SWEEPS).increment(1);

        for entry in entries {
            match self.dispatcher.replay(&entry).await {
                ReplayOutcome::Confirmed(_) => match self.queue.mark_synced(&entry.id).await {
                    Ok(true) => report.synced += 1,
                    Ok(false) => debug!(scan_id = %entry.id, "Scan already pruned by a live verification"),
                    Err(e) => {
                        warn!(scan_id = %entry.id, "Failed to mark scan synced: {}", e);
                        report.pending += 1;
                    }
                },
                ReplayOutcome::Rejected(reply) => {
                    let reason = rejection_reason(&reply);
                    if let Err(e) = self.queue.remove(&entry.id).await {
                        warn!(scan_id = %entry.id, "Failed to drop rejected scan: {}", e);
                    }
                    warn!(scan_id = %entry.id, event_id = %entry.event_id, reason = %reason, "Offline scan rejected");
                    report.rejected.push(RejectedScan {
                        scan_id: entry.id,
                        event_id: entry.event_id,
                        participant_code: entry.participant_code,
                        reason,
                    });
                }
                ReplayOutcome::Pending(reason) => {
                    debug!(scan_id = %entry.id, reason = %reason, "Scan left pending");
                    report.pending += 1;
                }
            }
        }

        if report.synced > 0 {
            if let Err(e) = self.queue.purge_synced().await {
                warn!("Failed to purge synced scans: {}", e);
            }
        }

        counter!(SYNC_SYNCED).increment(report.synced as u64);
        counter!(SYNC_REJECTED).increment(report.rejected.len() as u64);
        gauge!(QUEUE_PENDING).set(report.pending as f64);
        info!(
            synced = report.synced,
            rejected = report.rejected.len(),
            pending = report.pending,
            "Sync sweep finished"
        );

        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    /// Run sweeps on connectivity restoration, on a fixed period and on
    /// demand until shutdown
    pub fn spawn(
        self: Arc<Self>,
        inbox: SyncInbox,
        period: Duration,
        shutdown: &ShutdownCoordinator,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = shutdown.subscribe();
        let mut connectivity = self.dispatcher.connectivity().subscribe();
        let SyncInbox { mut rx } = inbox;
        let mut previous = *connectivity.borrow_and_update();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(?period, "Sync coordinator started");
            loop {
                let trigger = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    Some(trigger) = rx.recv() => trigger,
                    _ = ticker.tick() => SyncTrigger::Periodic,
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now = *connectivity.borrow_and_update();
                        let came_back = restored(previous, now);
                        previous = now;
                        if !came_back {
                            continue;
                        }
                        SyncTrigger::ConnectivityRestored
                    }
                };

                if let Err(e) = self.sweep(trigger).await {
                    error!(?trigger, "Sync sweep failed: {}", e);
                }
            }
            info!("Sync coordinator stopped");
        })
    }
}

fn rejection_reason(reply: &ServerReply) -> String {
    match reply {
        ServerReply::ParticipantNotFound => "participant not registered for this event".to_string(),
        ServerReply::EventArchived => "event is archived".to_string(),
        ServerReply::EventNotFound => "event not found".to_string(),
        ServerReply::InvalidInput(message) => format!("invalid input: {}", message),
        other => format!("{:?}", other),
    }
}

fn restored(previous: Connectivity, now: Connectivity) -> bool {
    !previous.is_online() && now.is_online()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_device::network::{ConnectivityMonitor, NetworkQuality};
    use crate::core_device::queue::OfflineScanEntry;
    use crate::core_device::transport::{TransportError, VerifyTransport};
    use crate::core_ledger::VerificationStatus;
    use crate::core_verify::VerifiedData;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Confirms every scan, pruning the queue first the way a live
    /// verification of the same participant does
    struct PruningTransport {
        queue: Arc<OfflineQueue>,
    }

    #[async_trait]
    impl VerifyTransport for PruningTransport {
        async fn verify(
            &self,
            event_id: &EventId,
            code: &ParticipantCode,
            _timeout: Duration,
        ) -> Result<ServerReply, TransportError> {
            self.queue
                .prune_confirmed(event_id, code)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            Ok(ServerReply::Verified(VerifiedData {
                participant_code: code.to_string(),
                name: "John Doe".to_string(),
                status: VerificationStatus::Verified,
                verified_at: Utc::now(),
            }))
        }
    }

    #[tokio::test]
    async fn test_entry_pruned_mid_sweep_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(OfflineQueue::open(dir.path().join("queue.db")).unwrap());
        let event_id = EventId::new("evt-1");
        let code = ParticipantCode::parse("ID001").unwrap();
        queue
            .enqueue(&OfflineScanEntry::new(event_id.clone(), code, Utc::now()))
            .await
            .unwrap();

        let transport = Arc::new(PruningTransport { queue: queue.clone() });
        let dispatcher = Arc::new(VerificationDispatcher::new(
            transport,
            queue.clone(),
            ConnectivityMonitor::new(Connectivity::Online(NetworkQuality::FourG)),
        ));
        let coordinator = SyncCoordinator::new(dispatcher);

        let report = coordinator.sweep(SyncTrigger::Manual).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.synced, 0);
        assert_eq!(report.pending, 0);
        assert!(report.rejected.is_empty());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[test]
    fn test_message_wire_shape() {
        let raw = serde_json::to_string(&SyncMessage::SyncOfflineScans).unwrap();
        assert_eq!(raw, r#"{"type":"SYNC_OFFLINE_SCANS"}"#);
    }

    #[tokio::test]
    async fn test_handle_accepts_message_and_tag() {
        let (handle, mut inbox) = SyncHandle::channel();

        assert!(handle.handle_message(r#"{"type":"SYNC_OFFLINE_SCANS"}"#).unwrap());
        assert!(handle.handle_platform_sync(SYNC_TAG));
        assert!(!handle.handle_platform_sync("other-tag"));
        assert!(handle.handle_message(r#"{"type":"NOPE"}"#).is_err());

        assert_eq!(inbox.rx.recv().await, Some(SyncTrigger::Manual));
        assert_eq!(inbox.rx.recv().await, Some(SyncTrigger::Platform));
    }

    #[tokio::test]
    async fn test_full_channel_coalesces() {
        let (handle, _inbox) = SyncHandle::channel();
        for _ in 0..TRIGGER_BUFFER * 2 {
            assert!(handle.sync_now());
        }
    }

    #[test]
    fn test_restoration_edge() {
        let online = Connectivity::Online(NetworkQuality::FourG);
        assert!(restored(Connectivity::Offline, online));
        assert!(!restored(online, Connectivity::Online(NetworkQuality::TwoG)));
        assert!(!restored(online, Connectivity::Offline));
    }
}
