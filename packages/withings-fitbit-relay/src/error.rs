//! Error taxonomy for the relay.
//!
//! Every variant is logged server-side when it is turned into an HTTP
//! response. Callers only ever see a generic status line; no structured
//! error codes leave the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::Provider;

/// Unified error type for the relay service.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // ── Startup ─────────────────────────────────────────────────────────
    #[error("Missing configuration: {0}")]
    Config(String),

    // ── OAuth ───────────────────────────────────────────────────────────
    #[error("{provider} authorization code exchange failed: {message}")]
    AuthExchange { provider: Provider, message: String },

    #[error("{provider} token refresh failed: {message}")]
    Refresh { provider: Provider, message: String },

    #[error("Invalid or expired authorization state")]
    InvalidState,

    // ── Relay ───────────────────────────────────────────────────────────
    #[error("No subscription for Withings user {0}")]
    UnknownSubscription(String),

    #[error("No stored {provider} token for user {user_id}")]
    MissingToken { provider: Provider, user_id: String },

    #[error("{provider} request failed: {message}")]
    UpstreamRequest { provider: Provider, message: String },

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Store error: {0}")]
    Store(String),
}

impl RelayError {
    /// HTTP status returned to the caller for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::AuthExchange { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Refresh { .. } => StatusCode::BAD_GATEWAY,
            RelayError::InvalidState => StatusCode::BAD_REQUEST,
            RelayError::UnknownSubscription(_) => StatusCode::NOT_FOUND,
            RelayError::MissingToken { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::UpstreamRequest { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Store(e.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(status = status.as_u16(), error = %self, "Request failed");

        let reason = status.canonical_reason().unwrap_or("Error");
        (status, reason).into_response()
    }
}
