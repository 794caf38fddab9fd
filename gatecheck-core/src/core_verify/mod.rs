//! Verification Service
//!
//! The authoritative state machine deciding each scan's outcome, the wire
//! contract it speaks and the HTTP endpoint exposing it.

pub mod http;
pub mod outcome;
pub mod service;
pub mod wire;

pub use outcome::{Outcome, VerifyError, VerifyResult};
pub use service::VerificationService;
pub use wire::{Envelope, ErrorBody, ErrorCode, ServerReply, VerifiedData, VerifyRequest};
