//! SQLite plumbing shared by the server-side ledger and the device-side
//! offline queue.
//!
//! Both stores use an `r2d2` pool of `rusqlite` connections and apply
//! versioned migrations tracked in a per-store version table.

pub mod migrations;
pub mod pool;

pub use migrations::{current_version, migrate, Migration};
pub use pool::{open_pool, SqlitePool, StorageError};
