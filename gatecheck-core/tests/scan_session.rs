/*
    scan_session.rs - Capture, session coordination and background sync

    Feeds codes through a channel-backed frame source into a full
    ScanDevice and watches the operator feedback it produces.
*/

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{code, Fixture, LoopbackTransport};
use gatecheck_core::config::Config;
use gatecheck_core::core_device::{
    CaptureError, Connectivity, FrameSource, NetworkQuality, OfflineQueue, OfflineScanEntry,
    ScanDevice, ScanResult, ScanSession, SessionState, SessionUpdate, SyncTrigger,
};
use gatecheck_core::core_ledger::EventId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct ChannelSource(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Option<String>, CaptureError>> {
        self.0.recv().await.map(|code| Ok(Some(code)))
    }
}

fn device_config(fixture: &Fixture, auto_dismiss: Duration) -> Config {
    let mut config = Config::default();
    config.device.queue_path = fixture.dir.path().join("queue.db");
    config.device.org_id = "acme".to_string();
    config.scanner.debounce_window = Duration::from_millis(20);
    config.scanner.auto_dismiss = auto_dismiss;
    config.server.shutdown_timeout = Duration::from_secs(2);
    config
}

async fn next(session: &mut ScanSession) -> SessionUpdate {
    timeout(Duration::from_secs(5), session.next_update())
        .await
        .expect("no session update in time")
        .expect("session ended")
}

#[tokio::test]
async fn test_scans_suppressed_until_acknowledged() {
    let fixture = Fixture::new().await;
    let transport = LoopbackTransport::new(&fixture);
    let config = device_config(&fixture, Duration::from_secs(60));
    let device = ScanDevice::start_with_transport(
        config,
        transport.clone(),
        Connectivity::Online(NetworkQuality::FourG),
    )
    .await
    .unwrap();

    let (frames, rx) = mpsc::unbounded_channel();
    let (mut session, capture) = device.start_session(ChannelSource(rx), EventId::new("evt-1"));

    frames.send("ID001".to_string()).unwrap();
    match next(&mut session).await {
        SessionUpdate::Result { code, result: ScanResult::Verified(data) } => {
            assert_eq!(code, "ID001");
            assert_eq!(data.name, "John Doe");
        }
        other => panic!("unexpected update {:?}", other),
    }
    assert_eq!(session.state(), SessionState::AwaitingAck);

    // Result still on screen: this scan is dropped, not deferred
    frames.send("ID002".to_string()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 1);

    session.acknowledge();
    assert_eq!(next(&mut session).await, SessionUpdate::Dismissed);

    frames.send("ID002".to_string()).unwrap();
    match next(&mut session).await {
        SessionUpdate::Result { code, result } => {
            assert_eq!(code, "ID002");
            assert_eq!(result.status(), "verified");
        }
        other => panic!("unexpected update {:?}", other),
    }
    assert_eq!(transport.calls(), 2);

    session.close().await;
    capture.stop().await;
    device.dispose().await;
}

#[tokio::test]
async fn test_result_auto_dismisses() {
    let fixture = Fixture::new().await;
    let transport = LoopbackTransport::new(&fixture);
    let config = device_config(&fixture, Duration::from_millis(150));
    let device = ScanDevice::start_with_transport(
        config,
        transport,
        Connectivity::Online(NetworkQuality::FourG),
    )
    .await
    .unwrap();

    let (frames, rx) = mpsc::unbounded_channel();
    let (mut session, capture) = device.start_session(ChannelSource(rx), EventId::new("evt-1"));

    frames.send("ID999".to_string()).unwrap();
    assert!(matches!(
        next(&mut session).await,
        SessionUpdate::Result { result: ScanResult::NotFound, .. }
    ));
    assert_eq!(next(&mut session).await, SessionUpdate::Dismissed);
    assert_eq!(session.state(), SessionState::Idle);

    session.close().await;
    capture.stop().await;
    device.dispose().await;
}

#[tokio::test]
async fn test_reconnect_triggers_sync() {
    let fixture = Fixture::new().await;
    let transport = LoopbackTransport::new(&fixture);
    let config = device_config(&fixture, Duration::from_millis(50));
    let device = ScanDevice::start_with_transport(config, transport, Connectivity::Offline)
        .await
        .unwrap();
    let mut reports = device.sync().subscribe();

    let result = device.dispatcher().dispatch(&EventId::new("evt-1"), "ID001").await.unwrap();
    assert!(matches!(result, ScanResult::SavedOffline { .. }));

    device.connectivity().set_online(NetworkQuality::TwoG);
    let report = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
    assert_eq!(report.trigger, SyncTrigger::ConnectivityRestored);
    assert_eq!(report.synced, 1);
    assert_eq!(device.queue().pending_count().await.unwrap(), 0);

    device.dispose().await;
}

#[tokio::test]
async fn test_foreground_message_runs_sweep() {
    let fixture = Fixture::new().await;
    let transport = LoopbackTransport::new(&fixture);
    let config = device_config(&fixture, Duration::from_millis(50));
    let device = ScanDevice::start_with_transport(
        config,
        transport,
        Connectivity::Online(NetworkQuality::Unknown),
    )
    .await
    .unwrap();
    let mut reports = device.sync().subscribe();

    let entry = OfflineScanEntry::new(EventId::new("evt-1"), code("ID002"), Utc::now());
    device.queue().enqueue(&entry).await.unwrap();

    assert!(device.sync_handle().handle_message(r#"{"type":"SYNC_OFFLINE_SCANS"}"#).unwrap());
    let report = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
    assert_eq!(report.trigger, SyncTrigger::Manual);
    assert_eq!(report.synced, 1);

    device.dispose().await;

    // The queue file outlives the device and reopens drained
    let reopened = OfflineQueue::open(fixture.dir.path().join("queue.db")).unwrap();
    assert!(reopened.list_all().await.unwrap().is_empty());
}
