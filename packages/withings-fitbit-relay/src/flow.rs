//! Authorization flow controller.
//!
//! Walks a user through both OAuth2 handshakes:
//!
//! ```text
//! Start → WithingsRedirected → WithingsCallback
//!       → FitbitRedirected → FitbitCallback → Linked
//! ```
//!
//! The Withings user ID is carried across the Fitbit redirect as a
//! server-side [`PendingLinks`](crate::state::PendingLinks) nonce in the
//! OAuth `state` parameter.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::error::RelayError;
use crate::oauth::pages::{consent_html, error_html};
use crate::oauth::{exchange_and_store, OAuthClient};
use crate::state::{AppState, PendingLinks};
use crate::store::Provider;

/// Opaque `state` sent with the Withings authorization; nothing rides on it.
const WITHINGS_STATE: &str = "withings";

/// Query parameters accepted by both authorization endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    /// Authorization code from the provider.
    pub code: Option<String>,
    /// OAuth state echoed back by the provider.
    pub state: Option<String>,
    /// Error from the provider (e.g. `access_denied`).
    pub error: Option<String>,
    /// Error description.
    pub error_description: Option<String>,
}

/// Handshake state of an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing usable arrived; begin again at the Withings step.
    Start,
    /// Show the Withings consent link.
    WithingsRedirected,
    /// Withings returned a code.
    WithingsCallback { code: String },
    /// Show the Fitbit consent link, carrying the pending-link nonce.
    FitbitRedirected { nonce: String },
    /// Fitbit returned a code for a known pending link.
    FitbitCallback { code: String, nonce: String },
    /// Both accounts linked.
    Linked,
    /// The provider reported an authorization error.
    Denied { message: String },
}

impl FlowState {
    /// Classify a request to the authorization endpoint of `provider`.
    ///
    /// A Fitbit callback whose state is missing or unknown fails with
    /// `InvalidState`: the Withings user it belongs to cannot be recovered.
    pub fn resolve(
        provider: Provider,
        query: &AuthQuery,
        pending: &PendingLinks,
    ) -> Result<Self, RelayError> {
        if query.code.is_none() {
            if let Some(error) = &query.error {
                return Ok(FlowState::Denied {
                    message: query
                        .error_description
                        .clone()
                        .unwrap_or_else(|| error.clone()),
                });
            }
        }

        let known_nonce = query
            .state
            .as_ref()
            .filter(|nonce| pending.peek(nonce).is_some())
            .cloned();

        Ok(match (provider, query.code.clone(), known_nonce) {
            (Provider::Withings, None, _) => FlowState::WithingsRedirected,
            (Provider::Withings, Some(code), _) => FlowState::WithingsCallback { code },
            (Provider::Fitbit, None, Some(nonce)) => FlowState::FitbitRedirected { nonce },
            (Provider::Fitbit, None, None) => FlowState::Start,
            (Provider::Fitbit, Some(code), Some(nonce)) => FlowState::FitbitCallback { code, nonce },
            (Provider::Fitbit, Some(_), None) => return Err(RelayError::InvalidState),
        })
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET {prefix}/auth/withings
pub async fn withings_auth(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Response, RelayError> {
    let step = FlowState::resolve(Provider::Withings, &query, &state.pending)?;
    advance(&state, step).await
}

/// GET {prefix}/auth/fitbit
pub async fn fitbit_auth(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Response, RelayError> {
    let step = FlowState::resolve(Provider::Fitbit, &query, &state.pending)?;
    advance(&state, step).await
}

/// Execute a state. The callback states perform the token exchanges and
/// persist their results before any redirect is issued; a completed Fitbit
/// callback moves on to `Linked`.
async fn advance(state: &AppState, mut step: FlowState) -> Result<Response, RelayError> {
    let config = &state.config;
    loop {
        step = match step {
            FlowState::Start => {
                return Ok(Redirect::to(&config.route("/auth/withings")).into_response())
            }
            FlowState::WithingsRedirected => {
                return Ok(consent_html(
                    Provider::Withings,
                    &state.withings.authorize_url(WITHINGS_STATE),
                )
                .into_response())
            }
            FlowState::WithingsCallback { code } => {
                let record =
                    exchange_and_store(state.withings.as_ref(), state.store.as_ref(), &code)
                        .await?;
                let nonce = state.pending.issue(&record.user_id);
                return Ok(Redirect::to(&format!(
                    "{}?state={}",
                    config.route("/auth/fitbit"),
                    urlencoding::encode(&nonce)
                ))
                .into_response());
            }
            FlowState::FitbitRedirected { nonce } => {
                return Ok(
                    consent_html(Provider::Fitbit, &state.fitbit.authorize_url(&nonce))
                        .into_response(),
                )
            }
            FlowState::FitbitCallback { code, nonce } => {
                link_accounts(state, &code, &nonce).await?;
                FlowState::Linked
            }
            FlowState::Linked => {
                return Ok(Redirect::to(&config.route("/complete")).into_response())
            }
            FlowState::Denied { message } => {
                tracing::warn!(message = message.as_str(), "Provider denied authorization");
                return Ok(error_html(&message).into_response());
            }
        };
    }
}

/// Finish the handshake: exchange the Fitbit code, link both users and
/// subscribe to Withings notifications.
async fn link_accounts(state: &AppState, code: &str, nonce: &str) -> Result<(), RelayError> {
    let withings_user_id = state.pending.take(nonce).ok_or(RelayError::InvalidState)?;
    let fitbit = exchange_and_store(state.fitbit.as_ref(), state.store.as_ref(), code).await?;

    state.store.set_link(&withings_user_id, &fitbit.user_id)?;
    subscribe_notifications(state, &withings_user_id).await?;

    tracing::info!(
        withings_user_id = withings_user_id.as_str(),
        fitbit_user_id = fitbit.user_id.as_str(),
        "Accounts linked"
    );
    Ok(())
}

/// Register the relay's webhook with Withings for this user.
///
/// Skipped with a warning when no public base URL is configured.
async fn subscribe_notifications(state: &AppState, withings_user_id: &str) -> Result<(), RelayError> {
    let Some(callback_url) = state.config.webhook_url() else {
        tracing::warn!(
            withings_user_id = withings_user_id,
            "PUBLIC_BASE_URL not set, skipping Withings notification subscription"
        );
        return Ok(());
    };

    let record = state
        .store
        .get_token(Provider::Withings, withings_user_id)
        .ok_or_else(|| RelayError::MissingToken {
            provider: Provider::Withings,
            user_id: withings_user_id.to_string(),
        })?;

    state
        .withings
        .subscribe(&record.access_token, &callback_url)
        .await
}
