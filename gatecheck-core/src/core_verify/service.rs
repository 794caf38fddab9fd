//! Verification state machine
//!
//! Decides, for one (tenant, event, participant) triple, whether a scan is
//! a first verification, a duplicate, an unknown participant or a scan
//! against a closed event. The service is stateless between calls; the
//! ledger's insert-if-absent is the only synchronization point, so any
//! number of scanners may call it concurrently. The insert re-checks that
//! the event is still active under the write lock, so an archive landing
//! mid-verification still answers `EventArchived`.

use super::outcome::{Outcome, VerifyError, VerifyResult};
use crate::core_ledger::{EventId, InsertReply, LedgerStore, ParticipantCode, TenantId};
use crate::metrics::{VERIFY_ERRORS, VERIFY_OUTCOME};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn LedgerStore>,
}

impl VerificationService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate a raw code, then verify it
    pub async fn verify_raw(
        &self,
        tenant: &TenantId,
        event_id: &EventId,
        raw_code: &str,
    ) -> VerifyResult<Outcome> {
        let code = ParticipantCode::parse(raw_code)?;
        self.verify(tenant, event_id, &code).await
    }

    pub async fn verify(
        &self,
        tenant: &TenantId,
        event_id: &EventId,
        code: &ParticipantCode,
    ) -> VerifyResult<Outcome> {
        let outcome = self.decide(tenant, event_id, code).await.map_err(|e| {
            warn!(tenant = %tenant, event_id = %event_id, error = %e, "Verification failed");
            counter!(VERIFY_ERRORS).increment(1);
            e
        })?;

        counter!(VERIFY_OUTCOME, "outcome" => outcome.as_str()).increment(1);
        match &outcome {
            Outcome::Verified(record) => info!(
                event_id = %event_id,
                participant = %code,
                verified_at = %record.verified_at,
                "Participant verified"
            ),
            other => debug!(
                event_id = %event_id,
                participant = %code,
                outcome = other.as_str(),
                "Verification rejected"
            ),
        }

        Ok(outcome)
    }

    async fn decide(
        &self,
        tenant: &TenantId,
        event_id: &EventId,
        code: &ParticipantCode,
    ) -> Result<Outcome, VerifyError> {
        // An unknown tenant has no events
        let Some(namespace) = self.store.resolve_namespace(tenant).await? else {
            return Ok(Outcome::EventNotFound);
        };

        let Some(event) = self.store.find_event(&namespace, event_id).await? else {
            return Ok(Outcome::EventNotFound);
        };

        if !event.active {
            return Ok(Outcome::EventArchived);
        }

        let Some(attendee) = self.store.find_attendee(&namespace, event_id, code).await? else {
            return Ok(Outcome::ParticipantNotFound);
        };

        let reply = self
            .store
            .insert_if_absent(&namespace, event_id, code, &attendee.name)
            .await?;

        Ok(match reply {
            InsertReply::Inserted(record) => Outcome::Verified(record),
            InsertReply::Conflict(original) => Outcome::Duplicate { original },
            // Archived after the active check above
            InsertReply::EventClosed => Outcome::EventArchived,
        })
    }
}
