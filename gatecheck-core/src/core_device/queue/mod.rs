//! Offline Queue
//!
//! Durable device-local store of scans captured while the verification
//! service could not be reached. Entries survive restarts and are replayed
//! by the sync coordinator.
//!
//! The queue has an explicit lifecycle: [`OfflineQueue::open`] creates and
//! migrates the database, [`OfflineQueue::close`] releases it. Operations
//! after `close` fail with [`QueueError::Closed`].

pub mod errors;
pub mod migrations;
pub mod store;
pub mod types;

pub use errors::{QueueError, QueueResult};
pub use migrations::{QUEUE_MIGRATIONS, QUEUE_VERSION_TABLE};
pub use store::OfflineQueue;
pub use types::{OfflineScanEntry, ScanId};
