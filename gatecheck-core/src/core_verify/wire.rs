//! Verification wire contract
//!
//! JSON shapes exchanged between scanning devices and the verification
//! endpoint. Both sides use these types so the envelope is defined once.
//!
//! ```json
//! { "success": true,  "data":  { "participantCode": "ID001", "name": "John Doe",
//!                                "status": "verified", "verifiedAt": "..." } }
//! { "success": false, "error": { "code": "DUPLICATE_SCAN", "message": "...",
//!                                "details": { ... original record ... } } }
//! ```

use super::outcome::Outcome;
use crate::core_ledger::{VerificationRecord, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request body for a verification call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub participant_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    EventNotFound,
    EventArchived,
    ParticipantNotFound,
    DuplicateScan,
    InvalidInput,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::EventNotFound => "EVENT_NOT_FOUND",
            ErrorCode::EventArchived => "EVENT_ARCHIVED",
            ErrorCode::ParticipantNotFound => "PARTICIPANT_NOT_FOUND",
            ErrorCode::DuplicateScan => "DUPLICATE_SCAN",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the endpoint answers with for this code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::EventNotFound | ErrorCode::ParticipantNotFound => 404,
            ErrorCode::DuplicateScan => 409,
            ErrorCode::EventArchived => 410,
            ErrorCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified participant as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedData {
    pub participant_code: String,
    pub name: String,
    pub status: VerificationStatus,
    pub verified_at: DateTime<Utc>,
}

impl From<&VerificationRecord> for VerifiedData {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            participant_code: record.participant_code.to_string(),
            name: record.name.clone(),
            status: record.status,
            verified_at: record.verified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Original record for `DUPLICATE_SCAN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<VerifiedData>,
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub enum Envelope {
    Success(VerifiedData),
    Failure(ErrorBody),
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<VerifiedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        match (raw.success, raw.data, raw.error) {
            (true, Some(data), _) => Ok(Envelope::Success(data)),
            (false, _, Some(error)) => Ok(Envelope::Failure(error)),
            (true, None, _) => Err("success envelope without data".to_string()),
            (false, _, None) => Err("failure envelope without error".to_string()),
        }
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Success(data) => RawEnvelope { success: true, data: Some(data), error: None },
            Envelope::Failure(error) => RawEnvelope { success: false, data: None, error: Some(error) },
        }
    }
}

impl Envelope {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Envelope::Failure(ErrorBody { code, message: message.into(), details: None })
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Envelope::Success(_) => 200,
            Envelope::Failure(body) => body.code.http_status(),
        }
    }

    /// Interpret the envelope on the device side
    pub fn into_reply(self) -> ServerReply {
        match self {
            Envelope::Success(data) => ServerReply::Verified(data),
            Envelope::Failure(ErrorBody { code, message, details }) => match code {
                ErrorCode::DuplicateScan => ServerReply::Duplicate { original: details, message },
                ErrorCode::ParticipantNotFound => ServerReply::ParticipantNotFound,
                ErrorCode::EventArchived => ServerReply::EventArchived,
                ErrorCode::EventNotFound => ServerReply::EventNotFound,
                ErrorCode::Unauthorized => ServerReply::Unauthorized(message),
                ErrorCode::InvalidInput => ServerReply::InvalidInput(message),
                ErrorCode::InternalError => ServerReply::Internal(message),
            },
        }
    }
}

impl From<&Outcome> for Envelope {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Verified(record) => Envelope::Success(record.into()),
            Outcome::Duplicate { original } => Envelope::Failure(ErrorBody {
                code: ErrorCode::DuplicateScan,
                message: format!(
                    "Participant already verified at {}",
                    original.verified_at.to_rfc3339()
                ),
                details: Some(original.into()),
            }),
            Outcome::ParticipantNotFound => {
                Envelope::error(ErrorCode::ParticipantNotFound, "Participant not registered for this event")
            }
            Outcome::EventArchived => {
                Envelope::error(ErrorCode::EventArchived, "Event is archived")
            }
            Outcome::EventNotFound => Envelope::error(ErrorCode::EventNotFound, "Event not found"),
        }
    }
}

/// What the server said, as seen by a scanning device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    Verified(VerifiedData),
    /// `original` is absent only if the server omitted details
    Duplicate { original: Option<VerifiedData>, message: String },
    ParticipantNotFound,
    EventArchived,
    EventNotFound,
    Unauthorized(String),
    InvalidInput(String),
    Internal(String),
}

impl ServerReply {
    /// Replies that prove the server has recorded this participant
    pub fn confirms_attendance(&self) -> bool {
        matches!(self, ServerReply::Verified(_) | ServerReply::Duplicate { .. })
    }
}
