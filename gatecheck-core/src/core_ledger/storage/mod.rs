//! Storage layer for the attendance ledger
//!
//! Provides SQL-based persistence for tenants, events, rosters and
//! verification records.

pub mod migrations;
pub mod sql_store;

pub use migrations::{CURRENT_LEDGER_SCHEMA_VERSION, LEDGER_MIGRATIONS, LEDGER_VERSION_TABLE};
pub use sql_store::LedgerSqlStore;
