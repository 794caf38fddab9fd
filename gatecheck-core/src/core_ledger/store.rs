//! Collaborator interface consumed by the verification service

use super::errors::LedgerResult;
use super::types::{
    AttendeeRosterEntry, Event, EventId, InsertReply, NamespaceId, ParticipantCode, TenantId,
};
use async_trait::async_trait;

/// Tenant-scoped read access to events and rosters plus the ledger's
/// insert-if-absent primitive.
///
/// Implementations must make `insert_if_absent` atomic across processes:
/// two concurrent calls for the same (event, participant) must produce
/// exactly one `Inserted`. Verification relies on this and takes no locks
/// of its own.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Map an organization to its namespace
    async fn resolve_namespace(&self, tenant: &TenantId) -> LedgerResult<Option<NamespaceId>>;

    async fn find_event(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
    ) -> LedgerResult<Option<Event>>;

    /// Roster lookup
    async fn find_attendee(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: &ParticipantCode,
    ) -> LedgerResult<Option<AttendeeRosterEntry>>;

    async fn insert_if_absent(
        &self,
        namespace: &NamespaceId,
        event_id: &EventId,
        code: &ParticipantCode,
        name: &str,
    ) -> LedgerResult<InsertReply>;
}
