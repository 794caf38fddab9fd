//! Connection pool construction

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Pool of SQLite connections
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// How long a connection waits on a locked database before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to create data directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Open (or create) a SQLite database file behind a connection pool.
///
/// Every connection gets foreign keys enabled and a busy timeout so that
/// writers from different pooled connections queue up instead of failing
/// with `SQLITE_BUSY`.
pub fn open_pool(path: impl AsRef<Path>, max_size: u32) -> Result<SqlitePool, StorageError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });

    let pool = Pool::builder().max_size(max_size.max(1)).build(manager)?;
    Ok(pool)
}
