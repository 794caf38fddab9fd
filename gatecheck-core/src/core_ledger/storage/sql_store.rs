//! SQL-based storage implementation for the attendance ledger

use super::migrations::{LEDGER_MIGRATIONS, LEDGER_VERSION_TABLE};
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::store::LedgerStore;
use crate::core_ledger::types::{
    AttendeeRosterEntry, Event, EventId, InsertReply, NamespaceId, ParticipantCode, TenantId,
    VerificationRecord, VerificationStatus,
};
use crate::storage::{migrate, open_pool, SqlitePool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, namespace, name, active, created_at, ended_at";
const RECORD_COLUMNS: &str = "id, event_id, participant_code, name, status, verified_at";

/// SQL-based storage for tenants, events, rosters and verification records
#[derive(Clone)]
pub struct LedgerSqlStore {
    pool: SqlitePool,
}

impl LedgerSqlStore {
    /// Open the ledger database at `path`, creating and migrating it as needed
    pub fn open(path: impl AsRef<Path>, max_connections: u32) -> LedgerResult<Self> {
        let pool = open_pool(path, max_connections)?;
        Self::from_pool(pool)
    }

    /// Wrap an existing pool, running migrations first
    pub fn from_pool(pool: SqlitePool) -> LedgerResult<Self> {
        migrate(&pool, LEDGER_VERSION_TABLE, LEDGER_MIGRATIONS)?;
        Ok(Self { pool })
    }

    async fn run<F, T>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Connection) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LedgerError::Join(e.to_string()))?
    }

    // ===== Administration =====

    /// Register an organization and the namespace its data lives in
    pub async fn register_tenant(
        &self,
        tenant: &TenantId,
        namespace: &NamespaceId,
    ) -> LedgerResult<()> {
        let tenant = tenant.clone();
        let namespace = namespace.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tenants (tenant_id, namespace, created_at) VALUES (?, ?, ?)",
                params![tenant.as_str(), namespace.as_str(), Utc::now().timestamp_millis()],
            )
            .map_err(|e| on_constraint(e, || format!("tenant {}", tenant)))?;
            Ok(())
        })
        .await
    }

    pub async fn create_event(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        name: &str,
    ) -> LedgerResult<Event> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        let name = name.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO events (namespace, id, name, active, created_at) VALUES (?, ?, ?, 1, ?)",
                params![
                    namespace.as_str(),
                    event_id.as_str(),
                    &name,
                    Utc::now().timestamp_millis()
                ],
            )
            .map_err(|e| on_constraint(e, || format!("event {} in {}", event_id, namespace)))?;

            select_event(conn, &namespace, &event_id)?
                .ok_or_else(|| LedgerError::EventNotFound(event_id.to_string()))
        })
        .await
    }

    /// Add one participant to an event's roster
    pub async fn add_attendee(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: &ParticipantCode,
        name: &str,
    ) -> LedgerResult<AttendeeRosterEntry> {
        let namespace = namespace.clone();
        let entry = AttendeeRosterEntry {
            event_id: event_id.clone(),
            participant_code: code.clone(),
            name: name.to_string(),
        };
        self.run(move |conn| {
            if select_event(conn, &namespace, &entry.event_id)?.is_none() {
                return Err(LedgerError::EventNotFound(entry.event_id.to_string()));
            }
            conn.execute(
                "INSERT INTO roster (namespace, event_id, participant_code, name) VALUES (?, ?, ?, ?)",
                params![
                    namespace.as_str(),
                    entry.event_id.as_str(),
                    entry.participant_code.as_str(),
                    &entry.name
                ],
            )
            .map_err(|e| {
                on_constraint(e, || {
                    format!("participant {} in event {}", entry.participant_code, entry.event_id)
                })
            })?;
            Ok(entry)
        })
        .await
    }

    /// Close an event to further verification
    pub async fn archive_event(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
    ) -> LedgerResult<Event> {
        self.set_active(namespace, event_id, false).await
    }

    pub async fn reactivate_event(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
    ) -> LedgerResult<Event> {
        self.set_active(namespace, event_id, true).await
    }

    async fn set_active(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        active: bool,
    ) -> LedgerResult<Event> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        self.run(move |conn| {
            let ended_at = (!active).then(|| Utc::now().timestamp_millis());
            let changed = conn.execute(
                "UPDATE events SET active = ?, ended_at = ? WHERE namespace = ? AND id = ?",
                params![active, ended_at, namespace.as_str(), event_id.as_str()],
            )?;
            if changed == 0 {
                return Err(LedgerError::EventNotFound(event_id.to_string()));
            }
            select_event(conn, &namespace, &event_id)?
                .ok_or_else(|| LedgerError::EventNotFound(event_id.to_string()))
        })
        .await
    }

    /// All verification records for an event, oldest first
    pub async fn list_verifications(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
    ) -> LedgerResult<Vec<VerificationRecord>> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM verifications
                 WHERE namespace = ? AND event_id = ?
                 ORDER BY verified_at, id"
            ))?;
            let records = stmt
                .query_map(params![namespace.as_str(), event_id.as_str()], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Number of records for an event, optionally narrowed to one participant
    pub async fn count_verifications(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: Option<&ParticipantCode>,
    ) -> LedgerResult<u64> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        let code = code.cloned();
        self.run(move |conn| {
            let count: i64 = match code {
                Some(code) => conn.query_row(
                    "SELECT COUNT(*) FROM verifications
                     WHERE namespace = ? AND event_id = ? AND participant_code = ?",
                    params![namespace.as_str(), event_id.as_str(), code.as_str()],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM verifications WHERE namespace = ? AND event_id = ?",
                    params![namespace.as_str(), event_id.as_str()],
                    |row| row.get(0),
                )?,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for LedgerSqlStore {
    async fn resolve_namespace(&self, tenant: &TenantId) -> LedgerResult<Option<NamespaceId>> {
        let tenant = tenant.clone();
        self.run(move |conn| {
            let namespace = conn
                .query_row(
                    "SELECT namespace FROM tenants WHERE tenant_id = ?",
                    params![tenant.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(namespace.map(NamespaceId))
        })
        .await
    }

    async fn find_event(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
    ) -> LedgerResult<Option<Event>> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        self.run(move |conn| select_event(conn, &namespace, &event_id)).await
    }

    async fn find_attendee(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: &ParticipantCode,
    ) -> LedgerResult<Option<AttendeeRosterEntry>> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        let code = code.clone();
        self.run(move |conn| {
            let entry = conn
                .query_row(
                    "SELECT event_id, participant_code, name FROM roster
                     WHERE namespace = ? AND event_id = ? AND participant_code = ?",
                    params![namespace.as_str(), event_id.as_str(), code.as_str()],
                    |row| {
                        Ok(AttendeeRosterEntry {
                            event_id: EventId(row.get(0)?),
                            participant_code: code_column(row, 1)?,
                            name: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn insert_if_absent(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: &ParticipantCode,
        name: &str,
    ) -> LedgerResult<InsertReply> {
        let namespace = namespace.clone();
        let event_id = event_id.clone();
        let code = code.clone();
        let name = name.to_string();
        self.run(move |conn| {
            // IMMEDIATE takes the write lock up front, so concurrent callers
            // wait on the busy timeout instead of deadlocking on upgrade.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // Archiving commits under the same write lock, so this read
            // cannot go stale before the insert below.
            let active: Option<bool> = tx
                .query_row(
                    "SELECT active FROM events WHERE namespace = ? AND id = ?",
                    params![namespace.as_str(), event_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if active != Some(true) {
                debug!(event_id = %event_id, participant = %code, "Insert refused, event closed");
                return Ok(InsertReply::EventClosed);
            }

            let inserted = tx.execute(
                "INSERT INTO verifications
                    (id, namespace, event_id, participant_code, name, status, verified_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (namespace, event_id, participant_code) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    namespace.as_str(),
                    event_id.as_str(),
                    code.as_str(),
                    &name,
                    VerificationStatus::Verified.as_str(),
                    Utc::now().timestamp_millis(),
                ],
            )?;

            let record = tx.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM verifications
                     WHERE namespace = ? AND event_id = ? AND participant_code = ?"
                ),
                params![namespace.as_str(), event_id.as_str(), code.as_str()],
                record_from_row,
            )?;
            tx.commit()?;

            debug!(
                event_id = %event_id,
                participant = %code,
                inserted = inserted == 1,
                "Ledger insert-if-absent"
            );

            Ok(if inserted == 1 {
                InsertReply::Inserted(record)
            } else {
                InsertReply::Conflict(record)
            })
        })
        .await
    }
}

fn select_event(
    conn: &Connection,
    namespace: &NamespaceId,
    event_id: &EventId,
) -> LedgerResult<Option<Event>> {
    let event = conn
        .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE namespace = ? AND id = ?"),
            params![namespace.as_str(), event_id.as_str()],
            event_from_row,
        )
        .optional()?;
    Ok(event)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let ended_at = match row.get::<_, Option<i64>>(5)? {
        Some(ms) => Some(millis_column(5, ms)?),
        None => None,
    };
    Ok(Event {
        id: EventId(row.get(0)?),
        namespace: NamespaceId(row.get(1)?),
        name: row.get(2)?,
        active: row.get(3)?,
        created_at: millis_column(4, row.get(4)?)?,
        ended_at,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let status: String = row.get(4)?;
    let status = match status.as_str() {
        "verified" => VerificationStatus::Verified,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown verification status '{}'", other).into(),
            ))
        }
    };

    Ok(VerificationRecord {
        id,
        event_id: EventId(row.get(1)?),
        participant_code: code_column(row, 2)?,
        name: row.get(3)?,
        status,
        verified_at: millis_column(5, row.get(5)?)?,
    })
}

fn code_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ParticipantCode> {
    let raw: String = row.get(idx)?;
    ParticipantCode::parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn millis_column(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {}", ms).into(),
        )
    })
}

/// Turn a uniqueness/foreign-key violation into a domain error
fn on_constraint(err: rusqlite::Error, what: impl FnOnce() -> String) -> LedgerError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            let is_foreign_key = msg.as_deref().is_some_and(|m| m.contains("FOREIGN KEY"));
            if is_foreign_key {
                LedgerError::TenantNotFound(what())
            } else {
                LedgerError::AlreadyExists(what())
            }
        }
        _ => LedgerError::Database(err),
    }
}
