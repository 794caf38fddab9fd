//! Scanning device
//!
//! Everything that runs on the gate device: capture with debounce, the
//! session coordinator serializing operator feedback, the dispatcher that
//! chooses between the server and the offline queue, and the background
//! sync that replays queued scans.

pub mod dispatcher;
pub mod network;
pub mod queue;
pub mod runtime;
pub mod scanner;
pub mod session;
pub mod sync;
pub mod transport;

pub use dispatcher::{
    DispatchError, InternalErrorPolicy, ReplayOutcome, ScanResult, VerificationDispatcher,
};
pub use network::{Connectivity, ConnectivityMonitor, NetworkQuality, TimeoutTable};
pub use queue::{OfflineQueue, OfflineScanEntry, QueueError, QueueResult, ScanId};
pub use runtime::{DeviceError, ScanDevice};
pub use scanner::{
    CaptureError, CaptureHandle, Debouncer, FrameSource, LinesFrameSource, ScanCapture, ScanEvent,
};
pub use session::{ScanSession, SessionState, SessionUpdate};
pub use sync::{
    RejectedScan, SyncCoordinator, SyncHandle, SyncInbox, SyncMessage, SyncReport, SyncTrigger,
    SYNC_TAG,
};
pub use transport::{HttpTransport, TransportError, VerifyTransport};
