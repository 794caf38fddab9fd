//! Database migrations for the device offline queue

use crate::storage::Migration;

pub const QUEUE_VERSION_TABLE: &str = "queue_schema_version";

pub const QUEUE_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Offline scan queue",
    up_sql: r#"
        CREATE TABLE IF NOT EXISTS offline_scans (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            participant_code TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_offline_scans_pending
            ON offline_scans(synced, captured_at);
        CREATE INDEX IF NOT EXISTS idx_offline_scans_event
            ON offline_scans(event_id);
    "#,
}];
