//! HTTP surface of the relay.
//!
//! - `GET  /` : redirect to the Withings step
//! - `GET  /health` : health check
//! - `GET  {prefix}/auth/withings` : Withings consent page / callback
//! - `GET  {prefix}/auth/fitbit` : Fitbit consent page / callback
//! - `GET  {prefix}/complete` : confirmation page
//! - `POST {prefix}/webhook` : Withings notification, runs the relay
//! - `GET  {prefix}/webhook` : callback URL probe from Withings

use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::RelayError;
use crate::flow;
use crate::oauth::pages::complete_html;
use crate::relay::{self, Notification};
use crate::state::AppState;

/// Build the full router with state attached.
pub fn router(state: AppState) -> Router {
    let relay_routes = Router::new()
        .route("/auth/withings", get(flow::withings_auth))
        .route("/auth/fitbit", get(flow::fitbit_auth))
        .route("/complete", get(complete_handler))
        .route("/webhook", get(webhook_probe).post(webhook_handler));

    let prefix = state.config.route_prefix.clone();
    let app = if prefix.is_empty() {
        relay_routes
    } else {
        Router::new().nest(&prefix, relay_routes)
    };

    app.route("/", get(root_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Notification Extraction ───────────────────────────────────────────────────

#[async_trait]
impl<S> FromRequest<S> for Notification
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/json"));

        if is_json {
            let Json(notification) = Json::<Notification>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(notification)
        } else {
            let Form(notification) = Form::<Notification>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(notification)
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Redirect to the first authorization step.
async fn root_handler(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.config.route("/auth/withings"))
}

/// Confirmation page after both accounts are linked.
async fn complete_handler() -> impl IntoResponse {
    complete_html()
}

/// Withings checks the callback URL answers before accepting a subscription.
async fn webhook_probe() -> &'static str {
    "ok"
}

/// Run the measurement relay for a Withings notification.
async fn webhook_handler(
    State(state): State<AppState>,
    notification: Notification,
) -> Result<&'static str, RelayError> {
    let outcome = relay::relay_measurements(&state, &notification).await?;
    tracing::info!(
        withings_user_id = notification.user_id.as_str(),
        fitbit_user_id = outcome.fitbit_user_id.as_str(),
        posted = outcome.posted.len(),
        "Relay complete"
    );
    Ok("ok")
}

/// Health check endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "withings-fitbit-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_links": state.pending.len(),
    }))
}
