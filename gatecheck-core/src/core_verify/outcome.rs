//! Canonical verification outcomes and service errors

use crate::core_ledger::{CodeError, LedgerError, VerificationRecord};
use thiserror::Error;

/// The one authoritative answer to a verification attempt.
///
/// All variants are terminal: a caller must never retry on any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First scan of this participant; a record was created
    Verified(VerificationRecord),
    /// Participant was already verified; carries the original record
    Duplicate { original: VerificationRecord },
    ParticipantNotFound,
    EventArchived,
    EventNotFound,
}

impl Outcome {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Verified(_) => "verified",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::ParticipantNotFound => "participant_not_found",
            Outcome::EventArchived => "event_archived",
            Outcome::EventNotFound => "event_not_found",
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Outcome::Verified(_))
    }
}

/// Result type for verification
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Failures that prevent an outcome from being decided
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Rejected before reaching the state machine
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CodeError),

    /// Ledger unavailable; retryable
    #[error("Ledger unavailable: {0}")]
    Store(#[from] LedgerError),
}

impl VerifyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            VerifyError::InvalidInput(_) => false,
            VerifyError::Store(e) => e.is_retryable(),
        }
    }
}
