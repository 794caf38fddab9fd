//! HTTP endpoint for the verification wire contract
//!
//! Every response body is an [`Envelope`](crate::core_verify::wire::Envelope);
//! the HTTP status mirrors its error code so intermediaries can tell a
//! server fault (5xx) from a domain answer (4xx).

pub mod auth;
pub mod handlers;
pub mod server;
pub mod state;

pub use auth::{bearer_token, Authenticator, StaticTokenAuthenticator};
pub use server::{build_router, VerificationServer, VERIFY_ROUTE};
pub use state::AppState;
