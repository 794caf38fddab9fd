//! Scan session coordinator
//!
//! Serializes operator feedback: while one scan is being dispatched or its
//! result is on screen, newly accepted codes are dropped rather than
//! queued behind it. The session returns to idle when the operator
//! acknowledges the result or the auto-dismiss timer fires.
//!
//! ```text
//! Idle --accepted--> Dispatching --result--> AwaitingAck --ack/timeout--> Idle
//! ```

use super::dispatcher::{DispatchError, ScanResult, VerificationDispatcher};
use super::scanner::ScanEvent;
use crate::core_ledger::EventId;
use crate::metrics::SCAN_SUPPRESSED;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const UPDATE_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dispatching,
    AwaitingAck,
}

/// Feedback for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Result { code: String, result: ScanResult },
    Failed { code: String, message: String },
    CaptureError(String),
    /// The previous result was acknowledged or timed out
    Dismissed,
}

pub struct ScanSession {
    updates: mpsc::Receiver<SessionUpdate>,
    ack_tx: mpsc::Sender<()>,
    close_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SessionState>,
    join: JoinHandle<()>,
}

impl ScanSession {
    /// Start coordinating scans for `event_id`
    pub fn start(
        events: mpsc::Receiver<ScanEvent>,
        dispatcher: Arc<VerificationDispatcher>,
        event_id: EventId,
        auto_dismiss: Duration,
    ) -> Self {
        let (updates_tx, updates) = mpsc::channel(UPDATE_BUFFER);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let coordinator = Coordinator {
            dispatcher,
            event_id,
            auto_dismiss,
            updates: updates_tx,
            state: state_tx,
        };
        let join = tokio::spawn(coordinator.run(events, ack_rx, close_rx));

        Self { updates, ack_tx, close_tx, state_rx, join }
    }

    /// Next piece of feedback, or `None` once the session has ended
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }

    /// Operator dismissed the current result
    pub fn acknowledge(&self) {
        let _ = self.ack_tx.try_send(());
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// End the session. A dispatch already in flight still completes and
    /// reaches the offline queue if needed; its result is discarded.
    pub async fn close(self) {
        let _ = self.close_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Session task ended abnormally: {}", e);
        }
    }
}

struct Coordinator {
    dispatcher: Arc<VerificationDispatcher>,
    event_id: EventId,
    auto_dismiss: Duration,
    updates: mpsc::Sender<SessionUpdate>,
    state: watch::Sender<SessionState>,
}

type Completion = (String, Result<ScanResult, DispatchError>);

impl Coordinator {
    async fn run(
        self,
        mut events: mpsc::Receiver<ScanEvent>,
        mut acks: mpsc::Receiver<()>,
        mut close: watch::Receiver<bool>,
    ) {
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(1);
        let mut state = SessionState::Idle;
        let mut dismiss_at: Option<Instant> = None;
        let mut capture_open = true;

        info!(event_id = %self.event_id, "Scan session started");
        loop {
            tokio::select! {
                _ = close.changed() => break,

                event = events.recv(), if capture_open => match event {
                    None => {
                        capture_open = false;
                        if state != SessionState::Dispatching {
                            break;
                        }
                    }
                    Some(ScanEvent::CaptureError(reason)) => {
                        self.emit(SessionUpdate::CaptureError(reason)).await;
                    }
                    Some(ScanEvent::Accepted(code)) if state == SessionState::Idle => {
                        state = SessionState::Dispatching;
                        self.start_dispatch(code, done_tx.clone());
                    }
                    Some(ScanEvent::Accepted(code)) => {
                        counter!(SCAN_SUPPRESSED).increment(1);
                        debug!(code = %code, ?state, "Scan suppressed while result outstanding");
                    }
                },

                Some((code, result)) = done_rx.recv() => {
                    let update = match result {
                        Ok(result) => SessionUpdate::Result { code, result },
                        Err(e) => SessionUpdate::Failed { code, message: e.to_string() },
                    };
                    state = SessionState::AwaitingAck;
                    dismiss_at = Some(Instant::now() + self.auto_dismiss);
                    self.emit(update).await;
                    if !capture_open {
                        break;
                    }
                }

                Some(()) = acks.recv() => {
                    if state == SessionState::AwaitingAck {
                        state = SessionState::Idle;
                        dismiss_at = None;
                        self.emit(SessionUpdate::Dismissed).await;
                    }
                }

                _ = sleep_until(dismiss_at.unwrap_or_else(Instant::now)), if dismiss_at.is_some() => {
                    state = SessionState::Idle;
                    dismiss_at = None;
                    self.emit(SessionUpdate::Dismissed).await;
                }
            }
            self.state.send_replace(state);
        }
        self.state.send_replace(SessionState::Idle);
        info!(event_id = %self.event_id, "Scan session ended");
    }

    fn start_dispatch(&self, code: String, done: mpsc::Sender<Completion>) {
        let dispatcher = self.dispatcher.clone();
        let event_id = self.event_id.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&event_id, &code).await;
            let _ = done.send((code, result)).await;
        });
    }

    async fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).await.is_err() {
            debug!("Session feedback receiver dropped");
        }
    }
}
