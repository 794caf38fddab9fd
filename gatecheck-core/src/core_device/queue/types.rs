use crate::core_ledger::{EventId, ParticipantCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Device-generated identifier of a queued scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A scan awaiting replay against the verification service.
///
/// `captured_at` is the device clock at capture time. It orders replay
/// but the server assigns its own `verified_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineScanEntry {
    pub id: ScanId,
    pub event_id: EventId,
    pub participant_code: ParticipantCode,
    pub captured_at: DateTime<Utc>,
    pub synced: bool,
}

impl OfflineScanEntry {
    pub fn new(event_id: EventId, participant_code: ParticipantCode, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: ScanId::generate(),
            event_id,
            participant_code,
            captured_at,
            synced: false,
        }
    }
}
