//! Device-side client for the verification endpoint

use crate::core_ledger::{EventId, ParticipantCode, TenantId};
use crate::core_verify::{Envelope, ServerReply, VerifyRequest};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Device is offline")]
    Offline,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    /// The server answered with a 5xx and no readable envelope
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// No complete response was obtained from the server
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Offline | TransportError::Timeout(_) | TransportError::Connect(_)
        )
    }
}

/// One verification round trip.
///
/// Implementations report any application-level answer as `Ok`, including
/// domain rejections. `Err` is reserved for calls that produced no usable
/// envelope.
#[async_trait]
pub trait VerifyTransport: Send + Sync {
    async fn verify(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
        timeout: Duration,
    ) -> Result<ServerReply, TransportError>;
}

/// HTTP transport posting to `{base}/api/v1/orgs/{org}/events/{event}/verify`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    org_id: TenantId,
    token: String,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        org_id: TenantId,
        token: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let base_url =
            Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            org_id,
            token: token.into(),
        })
    }

    fn endpoint(&self, event_id: &EventId) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend([
                "api",
                "v1",
                "orgs",
                self.org_id.as_str(),
                "events",
                event_id.as_str(),
                "verify",
            ]);
        Ok(url)
    }
}

#[async_trait]
impl VerifyTransport for HttpTransport {
    async fn verify(
        &self,
        event_id: &EventId,
        code: &ParticipantCode,
        timeout: Duration,
    ) -> Result<ServerReply, TransportError> {
        let url = self.endpoint(event_id)?;
        let body = VerifyRequest { participant_code: code.to_string() };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, timeout, None))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| classify(e, timeout, Some(status.as_u16())))?;
        debug!(status = status.as_u16(), "Verification response received");

        match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => Ok(envelope.into_reply()),
            Err(e) if status.is_server_error() => Err(TransportError::Server {
                status: status.as_u16(),
                message: truncate(&text).unwrap_or_else(|| e.to_string()),
            }),
            Err(e) => Err(TransportError::Protocol { status: status.as_u16(), message: e.to_string() }),
        }
    }
}

/// Only failures that left the device without any answer count as
/// connectivity. Anything after the server responded is a protocol error.
fn classify(err: reqwest::Error, timeout: Duration, status: Option<u16>) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if status.is_none() && (err.is_connect() || err.is_request()) {
        TransportError::Connect(err.to_string())
    } else {
        let status = status.or_else(|| err.status().map(|s| s.as_u16())).unwrap_or(0);
        TransportError::Protocol { status, message: err.to_string() }
    }
}

fn truncate(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(200).collect())
}
