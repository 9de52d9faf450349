//! Measurement relay.
//!
//! Runs once per Withings notification:
//!
//! 1. Resolve the Fitbit user linked to the notified Withings user
//! 2. Refresh both tokens (unconditionally, no expiry check)
//! 3. Fetch weight and fat-ratio groups for the notified range
//! 4. Map the first group to Fitbit body log entries, in the user's time zone
//! 5. Post each entry to Fitbit
//!
//! Any failure aborts the run. Nothing is retried and nothing is
//! deduplicated: the same notification delivered twice logs twice.

pub mod measures;

use serde::Deserialize;

use crate::error::RelayError;
use crate::oauth::{deserialize_user_id, refresh_and_store, BodyLog};
use crate::state::AppState;
use crate::store::{Provider, TokenRecord, TokenStore};

/// Withings notification payload.
///
/// Accepts the JSON shape (`userId`, `startDate`, `endDate`) as well as the
/// form fields Withings itself posts (`userid`, `startdate`, `enddate`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "userid", deserialize_with = "deserialize_user_id")]
    pub user_id: String,
    /// Unix seconds.
    #[serde(alias = "startdate")]
    pub start_date: i64,
    /// Unix seconds.
    #[serde(alias = "enddate")]
    pub end_date: i64,
}

/// What a relay run posted.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub fitbit_user_id: String,
    pub posted: Vec<BodyLog>,
}

fn stored_token(
    store: &dyn TokenStore,
    provider: Provider,
    user_id: &str,
) -> Result<TokenRecord, RelayError> {
    store
        .get_token(provider, user_id)
        .ok_or_else(|| RelayError::MissingToken {
            provider,
            user_id: user_id.to_string(),
        })
}

/// Relay the measurements announced by `notification` to Fitbit.
pub async fn relay_measurements(
    state: &AppState,
    notification: &Notification,
) -> Result<RelayOutcome, RelayError> {
    let store = state.store.as_ref();
    let withings_user_id = notification.user_id.as_str();

    let fitbit_user_id = store
        .get_link(withings_user_id)
        .ok_or_else(|| RelayError::UnknownSubscription(withings_user_id.to_string()))?;

    tracing::info!(
        withings_user_id = withings_user_id,
        fitbit_user_id = fitbit_user_id.as_str(),
        start_date = notification.start_date,
        end_date = notification.end_date,
        "Relaying measurements"
    );

    let withings_token = stored_token(store, Provider::Withings, withings_user_id)?;
    let fitbit_token = stored_token(store, Provider::Fitbit, &fitbit_user_id)?;

    let withings_token = refresh_and_store(state.withings.as_ref(), store, &withings_token).await?;
    let fitbit_token = refresh_and_store(state.fitbit.as_ref(), store, &fitbit_token).await?;

    let batch = state
        .withings
        .get_measures(
            &withings_token.access_token,
            notification.start_date,
            notification.end_date,
        )
        .await?;

    let logs = match batch.groups.first() {
        Some(group) => {
            let tz = measures::user_timezone(batch.timezone.as_deref());
            measures::body_logs(group, tz)?
        }
        None => {
            tracing::info!(
                withings_user_id = withings_user_id,
                "No measure groups in notified range"
            );
            Vec::new()
        }
    };

    for entry in &logs {
        state
            .fitbit
            .log_body(&fitbit_token.access_token, entry)
            .await?;
    }

    Ok(RelayOutcome {
        fitbit_user_id,
        posted: logs,
    })
}
