//! Scan capture
//!
//! Pulls decoded frames from a camera-like [`FrameSource`], suppresses
//! repeats of the same code inside the debounce window and forwards what
//! survives to the session coordinator. The capture loop never waits on
//! network I/O: events go out over a bounded channel with `try_send`, and
//! an event the consumer has no room for is dropped.

use crate::metrics::SCAN_DEBOUNCED;
use async_trait::async_trait;
use metrics::counter;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Frame could not be decoded: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that yields decoded frames.
///
/// `None` ends the stream. `Some(Ok(None))` is a frame that held no code.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<Option<String>, CaptureError>>;
}

/// Frame source reading one code per line, for terminals and pipes
pub struct LinesFrameSource<R> {
    lines: tokio::io::Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LinesFrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines() }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FrameSource for LinesFrameSource<R> {
    async fn next_frame(&mut self) -> Option<Result<Option<String>, CaptureError>> {
        match self.lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => Some(Ok(None)),
            Ok(Some(line)) => Some(Ok(Some(line))),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Accepted(String),
    CaptureError(String),
}

/// Drops a code seen again within `window` of its acceptance
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, code: &str, now: Instant) -> bool {
        if let Some((last_code, at)) = &self.last {
            if last_code == code && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((code.to_string(), now));
        true
    }
}

/// Handle onto a running capture loop
pub struct CaptureHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CaptureHandle {
    /// Stop the loop and release the source
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Capture task ended abnormally: {}", e);
        }
    }
}

pub struct ScanCapture;

impl ScanCapture {
    /// Start capturing from `source` on a background task
    pub fn spawn<S>(source: S, debounce_window: Duration) -> (mpsc::Receiver<ScanEvent>, CaptureHandle)
    where
        S: FrameSource + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(capture_loop(source, Debouncer::new(debounce_window), events_tx, stop_rx));
        (events_rx, CaptureHandle { stop_tx, join })
    }
}

async fn capture_loop<S: FrameSource>(
    mut source: S,
    mut debouncer: Debouncer,
    events: mpsc::Sender<ScanEvent>,
    mut stop: watch::Receiver<bool>,
) {
    info!("Scan capture started");
    loop {
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = source.next_frame() => frame,
        };

        let event = match frame {
            None => {
                debug!("Frame source exhausted");
                break;
            }
            Some(Ok(None)) => continue,
            Some(Ok(Some(code))) => {
                if !debouncer.accept(&code, Instant::now()) {
                    counter!(SCAN_DEBOUNCED).increment(1);
                    debug!(code = %code, "Repeat scan debounced");
                    continue;
                }
                ScanEvent::Accepted(code)
            }
            Some(Err(e)) => {
                warn!("Capture error: {}", e);
                ScanEvent::CaptureError(e.to_string())
            }
        };

        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!(?dropped, "Consumer busy, scan event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    info!("Scan capture stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Option<Result<Option<String>, CaptureError>>>);

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Option<Result<Option<String>, CaptureError>> {
            self.0.pop_front().flatten()
        }
    }

    fn frame(code: &str) -> Option<Result<Option<String>, CaptureError>> {
        Some(Ok(Some(code.to_string())))
    }

    #[test]
    fn test_debouncer_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));

        assert!(debouncer.accept("ID001", start));
        assert!(!debouncer.accept("ID001", start + Duration::from_millis(200)));
        assert!(!debouncer.accept("ID001", start + Duration::from_millis(1499)));
        assert!(debouncer.accept("ID001", start + Duration::from_millis(1500)));
    }

    #[test]
    fn test_debouncer_other_code_passes() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));

        assert!(debouncer.accept("ID001", start));
        assert!(debouncer.accept("ID002", start + Duration::from_millis(10)));
        assert!(debouncer.accept("ID001", start + Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_capture_forwards_and_debounces() {
        let source = ScriptedSource(VecDeque::from(vec![
            frame("ID001"),
            frame("ID001"),
            Some(Ok(None)),
            Some(Err(CaptureError::Decode("blurry".into()))),
            frame("ID002"),
        ]));
        let (mut events, handle) = ScanCapture::spawn(source, Duration::from_secs(60));

        assert_eq!(events.recv().await, Some(ScanEvent::Accepted("ID001".into())));
        assert!(matches!(events.recv().await, Some(ScanEvent::CaptureError(_))));
        assert_eq!(events.recv().await, Some(ScanEvent::Accepted("ID002".into())));
        assert_eq!(events.recv().await, None);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_lines_source() {
        let input: &[u8] = b"ID001\n\nID002\n";
        let mut source = LinesFrameSource::new(input);

        assert_eq!(source.next_frame().await.unwrap().unwrap(), Some("ID001".to_string()));
        assert_eq!(source.next_frame().await.unwrap().unwrap(), None);
        assert_eq!(source.next_frame().await.unwrap().unwrap(), Some("ID002".to_string()));
        assert!(source.next_frame().await.is_none());
    }
}
