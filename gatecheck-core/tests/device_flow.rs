/*
    device_flow.rs - Dispatcher, offline queue and sync working together

    Uses an in-process transport backed by a real verification service so
    the queue and the ledger can be checked after each step.
*/

mod common;

use chrono::Utc;
use common::{code, Fixture, LoopbackTransport, Mode};
use gatecheck_core::core_device::{
    Connectivity, ConnectivityMonitor, DispatchError, InternalErrorPolicy, NetworkQuality,
    OfflineQueue, OfflineScanEntry, ScanResult, SyncCoordinator, SyncTrigger, TimeoutTable,
    VerificationDispatcher,
};
use gatecheck_core::core_ledger::{EventId, TenantId};
use std::sync::Arc;
use std::time::Duration;

struct Device {
    fixture: Fixture,
    transport: Arc<LoopbackTransport>,
    queue: Arc<OfflineQueue>,
    monitor: ConnectivityMonitor,
}

impl Device {
    async fn new() -> Self {
        let fixture = Fixture::new().await;
        let transport = LoopbackTransport::new(&fixture);
        let queue = Arc::new(OfflineQueue::open(fixture.dir.path().join("queue.db")).unwrap());
        let monitor = ConnectivityMonitor::new(Connectivity::Online(NetworkQuality::FourG));
        Self { fixture, transport, queue, monitor }
    }

    fn dispatcher(&self, policy: InternalErrorPolicy) -> Arc<VerificationDispatcher> {
        let short = Duration::from_millis(100);
        let timeouts = TimeoutTable { slow_2g: short, two_g: short, three_g: short, four_g: short, unknown: short };
        Arc::new(
            VerificationDispatcher::new(self.transport.clone(), self.queue.clone(), self.monitor.clone())
                .with_timeouts(timeouts)
                .with_policy(policy),
        )
    }

    async fn ledger_count(&self, event: &str, participant: &str) -> u64 {
        self.fixture
            .store
            .count_verifications(&self.fixture.acme, &EventId::new(event), Some(&code(participant)))
            .await
            .unwrap()
    }
}

fn gala() -> EventId {
    EventId::new("evt-1")
}

#[tokio::test]
async fn test_online_verify_then_duplicate() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);

    let first = dispatcher.dispatch(&gala(), "ID001").await.unwrap();
    let ScanResult::Verified(data) = &first else { panic!("expected verified, got {:?}", first) };
    assert_eq!(data.name, "John Doe");
    assert_eq!(first.status(), "verified");

    let second = dispatcher.dispatch(&gala(), "ID001").await.unwrap();
    match second {
        ScanResult::Duplicate { original: Some(original), message } => {
            assert_eq!(original.verified_at, data.verified_at);
            assert!(message.contains(&data.verified_at.to_rfc3339()));
        }
        other => panic!("expected duplicate, got {:?}", other),
    }

    let missing = dispatcher.dispatch(&gala(), "ID999").await.unwrap();
    assert_eq!(missing, ScanResult::NotFound);
    let archived = dispatcher.dispatch(&EventId::new("evt-old"), "ID001").await.unwrap();
    assert_eq!(archived, ScanResult::EventArchived);

    assert!(device.queue.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_code_never_leaves_device() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);

    let err = dispatcher.dispatch(&gala(), "  ").await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidInput(_)));
    assert_eq!(device.transport.calls(), 0);
}

#[tokio::test]
async fn test_offline_scan_replayed_after_reconnect() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);
    let sync = SyncCoordinator::new(dispatcher.clone());

    // Offline: the transport is never called
    device.monitor.set_offline();
    let result = dispatcher.dispatch(&gala(), "ID002").await.unwrap();
    assert_eq!(result.status(), "offline");
    assert_eq!(device.transport.calls(), 0);
    assert_eq!(device.queue.pending_count().await.unwrap(), 1);
    assert_eq!(device.ledger_count("evt-1", "ID002").await, 0);

    // A sweep while still offline leaves the entry alone
    let report = sync.sweep(SyncTrigger::Periodic).await.unwrap();
    assert_eq!((report.synced, report.pending), (0, 1));

    device.monitor.set_online(NetworkQuality::ThreeG);
    let report = sync.sweep(SyncTrigger::ConnectivityRestored).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert!(report.rejected.is_empty());

    assert!(device.queue.list_all().await.unwrap().is_empty());
    assert_eq!(device.ledger_count("evt-1", "ID002").await, 1);
}

#[tokio::test]
async fn test_unreachable_server_queues() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);

    device.transport.set_mode(Mode::Hang);
    let timed_out = dispatcher.dispatch(&gala(), "ID001").await.unwrap();
    assert!(matches!(timed_out, ScanResult::SavedOffline { .. }));

    device.transport.set_mode(Mode::Refuse);
    let refused = dispatcher.dispatch(&gala(), "ID002").await.unwrap();
    assert!(matches!(refused, ScanResult::SavedOffline { .. }));

    assert_eq!(device.queue.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_internal_error_surfaced_by_default() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);

    device.transport.set_mode(Mode::Internal);
    let err = dispatcher.dispatch(&gala(), "ID001").await.unwrap_err();
    assert!(matches!(err, DispatchError::Server(_)));

    device.transport.set_mode(Mode::BadGateway);
    let err = dispatcher.dispatch(&gala(), "ID001").await.unwrap_err();
    assert!(matches!(err, DispatchError::Server(_)));

    assert!(device.queue.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_internal_error_queued_when_configured() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::QueueOffline);

    device.transport.set_mode(Mode::Internal);
    let result = dispatcher.dispatch(&gala(), "ID001").await.unwrap();
    assert!(matches!(result, ScanResult::SavedOffline { .. }));

    device.transport.set_mode(Mode::BadGateway);
    let result = dispatcher.dispatch(&gala(), "ID002").await.unwrap();
    assert!(matches!(result, ScanResult::SavedOffline { .. }));

    // Replay keeps them while the server is still failing
    let sync = SyncCoordinator::new(dispatcher.clone());
    let report = sync.sweep(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.pending, 2);

    device.transport.set_mode(Mode::Serve);
    let report = sync.sweep(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.synced, 2);
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);
    let sync = Arc::new(SyncCoordinator::new(dispatcher.clone()));

    // Two devices queued the same participant; another gate verified them online meanwhile
    for _ in 0..2 {
        let entry = OfflineScanEntry::new(gala(), code("ID001"), Utc::now());
        device.queue.enqueue(&entry).await.unwrap();
    }
    device.fixture.service().verify_raw(&TenantId::new("acme"), &gala(), "ID001").await.unwrap();

    let (a, b) = tokio::join!(sync.sweep(SyncTrigger::Manual), sync.sweep(SyncTrigger::Platform));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.synced + b.synced, 2);
    assert!(a.rejected.is_empty() && b.rejected.is_empty());
    assert!(device.queue.list_all().await.unwrap().is_empty());
    assert_eq!(device.ledger_count("evt-1", "ID001").await, 1);
}

#[tokio::test]
async fn test_terminal_rejections_dropped_on_replay() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);
    let sync = SyncCoordinator::new(dispatcher.clone());
    let mut reports = sync.subscribe();

    let archived = OfflineScanEntry::new(EventId::new("evt-old"), code("ID001"), Utc::now());
    let unknown = OfflineScanEntry::new(gala(), code("ID999"), Utc::now());
    let good = OfflineScanEntry::new(gala(), code("ID002"), Utc::now());
    for entry in [&archived, &unknown, &good] {
        device.queue.enqueue(entry).await.unwrap();
    }

    let report = sync.sweep(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.rejected.len(), 2);
    let rejected_ids: Vec<_> = report.rejected.iter().map(|r| r.scan_id).collect();
    assert!(rejected_ids.contains(&archived.id));
    assert!(rejected_ids.contains(&unknown.id));

    assert!(device.queue.list_all().await.unwrap().is_empty());
    assert_eq!(reports.recv().await.unwrap(), report);
}

#[tokio::test]
async fn test_online_verify_prunes_superseded_entries() {
    let device = Device::new().await;
    let dispatcher = device.dispatcher(InternalErrorPolicy::Surface);

    let same = OfflineScanEntry::new(gala(), code("ID001"), Utc::now());
    let other = OfflineScanEntry::new(gala(), code("ID002"), Utc::now());
    device.queue.enqueue(&same).await.unwrap();
    device.queue.enqueue(&other).await.unwrap();

    let result = dispatcher.dispatch(&gala(), "ID001").await.unwrap();
    assert_eq!(result.status(), "verified");

    let left = device.queue.list_all().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, other.id);
}
