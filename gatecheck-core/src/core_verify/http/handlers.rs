//! HTTP handlers for the verification endpoint

use super::auth::bearer_token;
use super::state::AppState;
use crate::core_ledger::{EventId, TenantId};
use crate::core_verify::wire::{Envelope, ErrorCode, VerifyRequest};
use crate::core_verify::VerifyError;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /api/v1/orgs/:org_id/events/:event_id/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path((org_id, event_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Envelope {
    let tenant = TenantId::new(org_id);

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    let authorized = match token {
        Some(token) => state.authenticator.authenticate(token).await,
        None => None,
    };
    if authorized.as_ref() != Some(&tenant) {
        debug!(tenant = %tenant, "Rejected unauthenticated verification request");
        return Envelope::error(ErrorCode::Unauthorized, "Missing or invalid credentials");
    }

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return Envelope::error(ErrorCode::InvalidInput, rejection.body_text());
        }
    };

    let event_id = EventId::new(event_id);
    match state.service.verify_raw(&tenant, &event_id, &request.participant_code).await {
        Ok(outcome) => Envelope::from(&outcome),
        Err(VerifyError::InvalidInput(e)) => Envelope::error(ErrorCode::InvalidInput, e.to_string()),
        Err(VerifyError::Store(e)) => {
            error!(tenant = %tenant, event_id = %event_id, error = %e, "Ledger error during verification");
            Envelope::error(ErrorCode::InternalError, "Verification temporarily unavailable")
        }
    }
}
