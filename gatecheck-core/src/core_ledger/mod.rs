//! Attendance Ledger
//!
//! Tenant-scoped persistence for events, their attendee rosters and the
//! append-only verification ledger.
//!
//! ## Key invariants
//!
//! 1. At most one `VerificationRecord` per (namespace, event, participant),
//!    enforced by a UNIQUE constraint rather than application locks
//! 2. Records are never updated or deleted by the verification path
//! 3. Rosters are read-only once an event is set up

pub mod errors;
pub mod storage;
pub mod store;
pub mod types;

pub use errors::{LedgerError, LedgerResult};
pub use storage::LedgerSqlStore;
pub use store::LedgerStore;
pub use types::{
    AttendeeRosterEntry, CodeError, Event, EventId, InsertReply, NamespaceId, ParticipantCode,
    TenantId, VerificationRecord, VerificationStatus, MAX_PARTICIPANT_CODE_LEN,
};
