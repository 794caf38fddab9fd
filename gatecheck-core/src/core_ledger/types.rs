//! Identifier and record types for events, rosters and the verification ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Longest participant code accepted from a scan
pub const MAX_PARTICIPANT_CODE_LEN: usize = 256;

/// Organization identifier, as issued by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Isolated data partition holding one tenant's events, roster and ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(pub String);

impl NamespaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejection reasons for a raw participant code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("participant code is empty")]
    Empty,

    #[error("participant code is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// A participant code that has been trimmed and checked.
///
/// Only values produced by [`ParticipantCode::parse`] reach the
/// verification state machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ParticipantCode(String);

impl ParticipantCode {
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        let len = trimmed.chars().count();
        if len > MAX_PARTICIPANT_CODE_LEN {
            return Err(CodeError::TooLong { len, max: MAX_PARTICIPANT_CODE_LEN });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ParticipantCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ParticipantCode::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub namespace: NamespaceId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Set when the event is archived, cleared on reactivation
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeRosterEntry {
    pub event_id: EventId,
    pub participant_code: ParticipantCode,
    pub name: String,
}

/// Status carried by a persisted record. Duplicate and invalid scans are
/// responses, never records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub event_id: EventId,
    pub participant_code: ParticipantCode,
    /// Display name copied from the roster at verification time
    pub name: String,
    pub status: VerificationStatus,
    pub verified_at: DateTime<Utc>,
}

/// Result of an insert-if-absent against the ledger.
///
/// `Conflict` carries the record that already occupied the
/// (event, participant) slot, never the attempted one. `EventClosed` means
/// the event was archived or missing when the write lock was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertReply {
    Inserted(VerificationRecord),
    Conflict(VerificationRecord),
    EventClosed,
}

impl InsertReply {
    pub fn record(&self) -> Option<&VerificationRecord> {
        match self {
            InsertReply::Inserted(record) | InsertReply::Conflict(record) => Some(record),
            InsertReply::EventClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_code_trims() {
        let code = ParticipantCode::parse("  ID001\n").unwrap();
        assert_eq!(code.as_str(), "ID001");
    }

    #[test]
    fn test_participant_code_rejects_blank() {
        assert_eq!(ParticipantCode::parse(""), Err(CodeError::Empty));
        assert_eq!(ParticipantCode::parse(" \t "), Err(CodeError::Empty));
    }

    #[test]
    fn test_participant_code_length_limit() {
        let long = "x".repeat(MAX_PARTICIPANT_CODE_LEN + 1);
        assert!(matches!(
            ParticipantCode::parse(&long),
            Err(CodeError::TooLong { .. })
        ));
        assert!(ParticipantCode::parse(&long[1..]).is_ok());
    }

    #[test]
    fn test_participant_code_deserialize_validates() {
        let ok: ParticipantCode = serde_json::from_str("\" ID002 \"").unwrap();
        assert_eq!(ok.as_str(), "ID002");
        assert!(serde_json::from_str::<ParticipantCode>("\"   \"").is_err());
    }
}
