//! Shared state for the verification endpoint

use super::auth::Authenticator;
use crate::core_verify::VerificationService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: VerificationService,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(service: VerificationService, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { service, authenticator }
    }
}
