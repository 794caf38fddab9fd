//! Request authentication
//!
//! Session issuance lives outside this crate; the endpoint only needs to
//! turn a bearer token into the tenant it was issued for.

use crate::core_ledger::TenantId;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Tenant the token belongs to, or `None` if the token is not valid
    async fn authenticate(&self, token: &str) -> Option<TenantId>;
}

/// Fixed token table, loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, TenantId>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, TenantId>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, tenant: TenantId) -> Self {
        self.tokens.insert(token.into(), tenant);
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<TenantId> {
        self.tokens.get(token).cloned()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
