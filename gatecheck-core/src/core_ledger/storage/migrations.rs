//! Database migrations for the attendance ledger

use crate::storage::Migration;

/// Current schema version for the ledger database
pub const CURRENT_LEDGER_SCHEMA_VERSION: i32 = 1;

pub const LEDGER_VERSION_TABLE: &str = "ledger_schema_version";

/// All available migrations in order
pub const LEDGER_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial tenants, events, roster and verification ledger schema",
    up_sql: r#"
        -- Organization to namespace mapping
        CREATE TABLE IF NOT EXISTS tenants (
            tenant_id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            ended_at INTEGER,                       -- NULL while active
            PRIMARY KEY (namespace, id),
            FOREIGN KEY (namespace) REFERENCES tenants(namespace) ON DELETE CASCADE
        );

        -- Attendee roster, fixed at event setup
        CREATE TABLE IF NOT EXISTS roster (
            namespace TEXT NOT NULL,
            event_id TEXT NOT NULL,
            participant_code TEXT NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY (namespace, event_id, participant_code),
            FOREIGN KEY (namespace, event_id) REFERENCES events(namespace, id) ON DELETE CASCADE
        );

        -- Append-only verification ledger. The UNIQUE constraint is the
        -- only thing standing between concurrent scanners and a double
        -- verification.
        CREATE TABLE IF NOT EXISTS verifications (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            event_id TEXT NOT NULL,
            participant_code TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('verified')),
            verified_at INTEGER NOT NULL,
            UNIQUE (namespace, event_id, participant_code),
            FOREIGN KEY (namespace, event_id) REFERENCES events(namespace, id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_verifications_event
            ON verifications(namespace, event_id, verified_at);
    "#,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{current_version, migrate, open_pool};
    use rusqlite::params;

    #[test]
    fn test_initial_migration() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("ledger.db"), 1).unwrap();
        migrate(&pool, LEDGER_VERSION_TABLE, LEDGER_MIGRATIONS).expect("Migration failed");

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in ["tenants", "events", "roster", "verifications"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
        drop(conn);
        assert_eq!(
            current_version(&pool, LEDGER_VERSION_TABLE).unwrap(),
            CURRENT_LEDGER_SCHEMA_VERSION
        );
    }

    #[test]
    fn test_unique_verification_constraint() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("ledger.db"), 1).unwrap();
        migrate(&pool, LEDGER_VERSION_TABLE, LEDGER_MIGRATIONS).unwrap();

        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO tenants (tenant_id, namespace, created_at) VALUES ('org', 'ns', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO events (namespace, id, name, created_at) VALUES ('ns', 'e1', 'Gala', 0)",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO verifications
            (id, namespace, event_id, participant_code, name, status, verified_at)
            VALUES (?, 'ns', 'e1', 'ID001', 'John Doe', 'verified', 0)";
        conn.execute(insert, params!["a"]).unwrap();
        assert!(conn.execute(insert, params!["b"]).is_err());
    }
}
