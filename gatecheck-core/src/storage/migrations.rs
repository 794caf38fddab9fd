//! Versioned schema migrations
//!
//! Each store declares its migrations in order and names its own version
//! table, so the ledger and the device queue can share one runner while
//! living in separate database files. Every migration is applied inside a
//! transaction together with the row recording it.

use super::pool::SqlitePool;
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

fn ensure_version_table(conn: &Connection, table: &str) -> Result<(), rusqlite::Error> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );"
    ))
}

fn version_on(conn: &Connection, table: &str) -> Result<i32, rusqlite::Error> {
    ensure_version_table(conn, table)?;
    conn.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {table}"),
        [],
        |row| row.get(0),
    )
}

/// Get current schema version recorded in `table`
pub fn current_version(pool: &SqlitePool, table: &str) -> Result<i32, super::StorageError> {
    let conn = pool.get()?;
    Ok(version_on(&conn, table)?)
}

/// Run all pending migrations, returning how many were applied
pub fn migrate(
    pool: &SqlitePool,
    table: &str,
    migrations: &[Migration],
) -> Result<usize, super::StorageError> {
    let mut conn = pool.get()?;
    let current = version_on(&conn, table)?;

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            &format!("INSERT INTO {table} (version, applied_at) VALUES (?, ?)"),
            params![migration.version, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            table,
            "Applied migration: {}", migration.description
        );
        applied += 1;
    }

    Ok(applied)
}
