//! SQLite-backed offline queue

use super::errors::{QueueError, QueueResult};
use super::migrations::{QUEUE_MIGRATIONS, QUEUE_VERSION_TABLE};
use super::types::{OfflineScanEntry, ScanId};
use crate::core_ledger::{EventId, ParticipantCode};
use crate::storage::{migrate, open_pool, SqlitePool};
use chrono::DateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, event_id, participant_code, captured_at, synced";

/// Durable map of scan id to pending scan
pub struct OfflineQueue {
    pool: RwLock<Option<SqlitePool>>,
}

impl OfflineQueue {
    /// Open the queue database at `path`, creating and migrating it as needed
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref();
        let pool = open_pool(path, 2)?;
        migrate(&pool, QUEUE_VERSION_TABLE, QUEUE_MIGRATIONS)?;
        info!(path = %path.display(), "Offline queue opened");
        Ok(Self { pool: RwLock::new(Some(pool)) })
    }

    /// Release the database. Calls already in flight run to completion.
    pub async fn close(&self) {
        if self.pool.write().await.take().is_some() {
            info!("Offline queue closed");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn run<F, T>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&mut Connection) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.read().await.clone().ok_or(QueueError::Closed)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| QueueError::Join(e.to_string()))?
    }

    /// Persist a new pending entry
    pub async fn enqueue(&self, entry: &OfflineScanEntry) -> QueueResult<()> {
        let entry = entry.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO offline_scans (id, event_id, participant_code, captured_at, synced)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    entry.id.to_string(),
                    entry.event_id.as_str(),
                    entry.participant_code.as_str(),
                    entry.captured_at.timestamp_millis(),
                    entry.synced
                ],
            )?;
            debug!(scan_id = %entry.id, event_id = %entry.event_id, "Scan queued offline");
            Ok(())
        })
        .await
    }

    /// Entries not yet confirmed by the server, in capture order
    pub async fn list_unsynced(&self) -> QueueResult<Vec<OfflineScanEntry>> {
        self.select(format!(
            "SELECT {ENTRY_COLUMNS} FROM offline_scans WHERE synced = 0 ORDER BY captured_at, id"
        ))
        .await
    }

    pub async fn list_all(&self) -> QueueResult<Vec<OfflineScanEntry>> {
        self.select(format!(
            "SELECT {ENTRY_COLUMNS} FROM offline_scans ORDER BY captured_at, id"
        ))
        .await
    }

    async fn select(&self, sql: String) -> QueueResult<Vec<OfflineScanEntry>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt.query_map([], entry_from_row)?.collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    pub async fn get(&self, id: &ScanId) -> QueueResult<Option<OfflineScanEntry>> {
        let id = *id;
        self.run(move |conn| {
            let entry = conn
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM offline_scans WHERE id = ?"),
                    params![id.to_string()],
                    entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    /// Flag an entry as confirmed by the server. Returns false if it is gone.
    pub async fn mark_synced(&self, id: &ScanId) -> QueueResult<bool> {
        let id = *id;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE offline_scans SET synced = 1 WHERE id = ?",
                params![id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn remove(&self, id: &ScanId) -> QueueResult<bool> {
        let id = *id;
        self.run(move |conn| {
            let changed =
                conn.execute("DELETE FROM offline_scans WHERE id = ?", params![id.to_string()])?;
            Ok(changed > 0)
        })
        .await
    }

    /// Drop every entry for an event, synced or not
    pub async fn clear_for_event(&self, event_id: &EventId) -> QueueResult<usize> {
        let event_id = event_id.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM offline_scans WHERE event_id = ?",
                params![event_id.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Drop entries the server has already confirmed
    pub async fn purge_synced(&self) -> QueueResult<usize> {
        self.run(|conn| Ok(conn.execute("DELETE FROM offline_scans WHERE synced = 1", [])?))
            .await
    }

    /// Cleanup after an online verification of `code` at `event_id`.
    ///
    /// Removes the event's synced entries and any pending entry for the
    /// same participant. Pending entries for other participants stay.
    pub async fn prune_confirmed(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
    ) -> QueueResult<usize> {
        let event_id = event_id.clone();
        let code = code.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM offline_scans
                 WHERE event_id = ? AND (synced = 1 OR participant_code = ?)",
                params![event_id.as_str(), code.as_str()],
            )?;
            Ok(removed)
        })
        .await
    }

    pub async fn pending_count(&self) -> QueueResult<usize> {
        self.run(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM offline_scans WHERE synced = 0", [], |row| {
                    row.get(0)
                })?;
            Ok(count.max(0) as usize)
        })
        .await
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<OfflineScanEntry> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let code: String = row.get(2)?;
    let participant_code = ParticipantCode::parse(&code)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let captured_ms: i64 = row.get(3)?;
    let captured_at = DateTime::from_timestamp_millis(captured_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("timestamp out of range: {}", captured_ms).into(),
        )
    })?;

    Ok(OfflineScanEntry {
        id: ScanId(id),
        event_id: EventId(row.get(1)?),
        participant_code,
        captured_at,
        synced: row.get(4)?,
    })
}
