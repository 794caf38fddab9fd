//! Graceful shutdown coordination
//!
//! Long-running loops (the verification server, scan capture, the sync
//! coordinator) subscribe to a broadcast signal and register their task
//! handles here. `shutdown` signals them and waits, up to the configured
//! timeout, for every registered task to finish before aborting stragglers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: RwLock::new(ShutdownState::Running),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Register a task to be awaited on shutdown
    pub async fn track(&self, component: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.lock().await.push((component.into(), handle));
    }

    /// Signal every subscriber and wait for tracked tasks to drain
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                warn!("Shutdown already in progress");
                return;
            }
            *state = ShutdownState::ShuttingDown;
        }
        info!("Initiating graceful shutdown");

        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            // No live subscribers; tracked tasks may already be done
            info!("No components subscribed to shutdown");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let deadline = tokio::time::Instant::now() + self.timeout;
        for (component, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(component = %component, "Component stopped"),
                Ok(Err(e)) => error!(component = %component, error = %e, "Component task failed"),
                Err(_) => {
                    warn!(component = %component, timeout = ?self.timeout, "Component did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Shut down on SIGTERM or SIGINT
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;
    });
}

#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C");
        coordinator.shutdown().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracked_task_drains() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut rx = coordinator.subscribe();
        let handle = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        coordinator.track("listener", handle).await;

        coordinator.shutdown().await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_aborted() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        coordinator.track("stuck", handle).await;

        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }
}
