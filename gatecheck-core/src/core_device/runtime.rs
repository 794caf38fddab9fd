//! Wiring for one scanning device
//!
//! Opens the offline queue, builds the dispatcher around it and starts the
//! sync coordinator. `dispose` stops the background loop and closes the
//! queue; nothing else holds device state.

use super::dispatcher::VerificationDispatcher;
use super::network::{Connectivity, ConnectivityMonitor};
use super::queue::{OfflineQueue, QueueError};
use super::scanner::{CaptureHandle, FrameSource, ScanCapture};
use super::session::ScanSession;
use super::sync::{SyncCoordinator, SyncHandle};
use super::transport::{HttpTransport, TransportError, VerifyTransport};
use crate::config::{Config, ConfigError};
use crate::core_ledger::{EventId, TenantId};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct ScanDevice {
    config: Config,
    queue: Arc<OfflineQueue>,
    connectivity: ConnectivityMonitor,
    dispatcher: Arc<VerificationDispatcher>,
    sync: Arc<SyncCoordinator>,
    sync_handle: SyncHandle,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ScanDevice {
    /// Start a device talking HTTP to `config.device.server_url`
    pub async fn start(config: Config, initial: Connectivity) -> Result<Self, DeviceError> {
        config.validate_device()?;
        let transport = HttpTransport::new(
            &config.device.server_url,
            TenantId::new(config.device.org_id.clone()),
            config.device.api_token.clone(),
        )?;
        Self::start_with_transport(config, Arc::new(transport), initial).await
    }

    pub async fn start_with_transport(
        config: Config,
        transport: Arc<dyn VerifyTransport>,
        initial: Connectivity,
    ) -> Result<Self, DeviceError> {
        let queue = Arc::new(OfflineQueue::open(&config.device.queue_path)?);
        let connectivity = ConnectivityMonitor::new(initial);
        let (sync_handle, inbox) = SyncHandle::channel();

        let dispatcher = Arc::new(
            VerificationDispatcher::new(transport, queue.clone(), connectivity.clone())
                .with_timeouts(config.dispatcher.timeouts.clone())
                .with_policy(config.dispatcher.internal_error_policy)
                .with_sync(sync_handle.clone()),
        );

        let shutdown = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
        let sync = Arc::new(SyncCoordinator::new(dispatcher.clone()));
        let join = sync.clone().spawn(inbox, config.sync.periodic_interval, &shutdown);
        shutdown.track("sync-coordinator", join).await;

        info!(queue = %config.device.queue_path.display(), ?initial, "Scan device started");
        Ok(Self { config, queue, connectivity, dispatcher, sync, sync_handle, shutdown })
    }

    /// Begin scanning `event_id` from `source`
    pub fn start_session<S>(&self, source: S, event_id: EventId) -> (ScanSession, CaptureHandle)
    where
        S: FrameSource + 'static,
    {
        let (events, capture) = ScanCapture::spawn(source, self.config.scanner.debounce_window);
        let session = ScanSession::start(
            events,
            self.dispatcher.clone(),
            event_id,
            self.config.scanner.auto_dismiss,
        );
        (session, capture)
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn dispatcher(&self) -> &Arc<VerificationDispatcher> {
        &self.dispatcher
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    pub fn sync_handle(&self) -> &SyncHandle {
        &self.sync_handle
    }

    /// Stop background sync and close the queue
    pub async fn dispose(self) {
        self.shutdown.shutdown().await;
        self.queue.close().await;
        info!("Scan device disposed");
    }
}
