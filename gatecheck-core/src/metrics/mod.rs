//! Metrics for verification, dispatch and offline replay
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding binary.

use metrics::{describe_counter, describe_gauge, describe_histogram, histogram};
use std::time::Instant;

pub const VERIFY_OUTCOME: &str = "verify.outcome";
pub const VERIFY_ERRORS: &str = "verify.errors";
pub const DISPATCH_ONLINE: &str = "dispatch.online";
pub const DISPATCH_OFFLINE: &str = "dispatch.offline";
pub const DISPATCH_DURATION_MS: &str = "dispatch.duration_ms";
pub const QUEUE_PENDING: &str = "queue.pending";
pub const SYNC_SWEEPS: &str = "sync.sweeps";
pub const SYNC_SYNCED: &str = "sync.synced";
pub const SYNC_REJECTED: &str = "sync.rejected";
pub const SCAN_DEBOUNCED: &str = "scan.debounced";
pub const SCAN_SUPPRESSED: &str = "scan.suppressed";

/// Register metric descriptions
pub fn init_metrics() {
    // Server
    describe_counter!(VERIFY_OUTCOME, "Verification outcomes, labelled by outcome");
    describe_counter!(VERIFY_ERRORS, "Verifications aborted by ledger errors");

    // Device
    describe_counter!(DISPATCH_ONLINE, "Scans answered by the verification service");
    describe_counter!(DISPATCH_OFFLINE, "Scans saved to the offline queue");
    describe_histogram!(DISPATCH_DURATION_MS, "Online verification round trip in milliseconds");
    describe_gauge!(QUEUE_PENDING, "Offline scans waiting for replay");
    describe_counter!(SYNC_SWEEPS, "Background sync sweeps run");
    describe_counter!(SYNC_SYNCED, "Offline scans confirmed by replay");
    describe_counter!(SYNC_REJECTED, "Offline scans rejected by the server on replay");
    describe_counter!(SCAN_DEBOUNCED, "Repeated decodes dropped by the debounce window");
    describe_counter!(SCAN_SUPPRESSED, "Accepted scans dropped while a result was outstanding");
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name).record(elapsed_ms);
        elapsed_ms
    }
}
