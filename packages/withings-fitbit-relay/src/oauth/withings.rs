//! Withings OAuth2 and Health Mate API client.
//!
//! Every Withings response is wrapped as `{ "status": <int>, "body": ... }`.
//! A non-zero `status` is a failure even when the HTTP status is 200.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::{required, token_request, CredentialStyle, Grant, OAuthClient, OAuthSettings, RawId};
use crate::config::{RelayConfig, WITHINGS_SCOPE};
use crate::error::RelayError;
use crate::store::{Provider, TokenRecord};

/// Weight (kg).
pub const MEASURE_TYPE_WEIGHT: i64 = 1;

/// Fat ratio (%).
pub const MEASURE_TYPE_FAT_RATIO: i64 = 6;

/// Real measurements, as opposed to user objectives.
const CATEGORY_REAL: &str = "1";

/// Notification application code for weight-related data.
const APPLI_WEIGHT: &str = "1";

/// Response envelope shared by every Withings endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: i64,
    body: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwrap the body, turning a non-zero status into a message.
    fn into_body(self) -> Result<Option<T>, String> {
        if self.status != 0 {
            return Err(match self.error {
                Some(error) => format!("status {}: {}", self.status, error),
                None => format!("status {}", self.status),
            });
        }
        Ok(self.body)
    }
}

/// Token endpoint body (`action=requesttoken`).
#[derive(Debug, Deserialize)]
struct TokenBody {
    userid: Option<RawId>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    scope: Option<String>,
    expires_in: Option<i64>,
}

/// A single reading inside a measure group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measure {
    /// Raw integer value; the real value is `value * 10^unit`.
    pub value: i64,
    #[serde(rename = "type")]
    pub measure_type: i64,
    /// Power-of-ten exponent applied to `value`.
    pub unit: i32,
}

/// Readings taken together at one point in time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeasureGroup {
    #[serde(default)]
    pub grpid: i64,
    /// Unix timestamp (seconds).
    pub date: i64,
    #[serde(default)]
    pub category: Option<i64>,
    #[serde(default)]
    pub measures: Vec<Measure>,
}

impl MeasureGroup {
    /// First reading of the given type.
    pub fn find(&self, measure_type: i64) -> Option<&Measure> {
        self.measures.iter().find(|m| m.measure_type == measure_type)
    }
}

#[derive(Debug, Deserialize)]
struct MeasureBody {
    #[serde(default)]
    measuregrps: Vec<MeasureGroup>,
    #[serde(default)]
    timezone: Option<String>,
}

/// Groups returned by `getmeas`, with the user's IANA time zone when
/// Withings reports one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureBatch {
    pub groups: Vec<MeasureGroup>,
    pub timezone: Option<String>,
}

/// Withings API client (OAuth2 + measure + notify).
pub struct WithingsClient {
    settings: OAuthSettings,
    api_url: String,
    http: Client,
}

impl WithingsClient {
    pub fn new(config: &RelayConfig) -> Self {
        let api_url = config.withings_api_url.trim_end_matches('/').to_string();
        Self {
            settings: OAuthSettings {
                provider: Provider::Withings,
                authorize_url: format!(
                    "{}/oauth2_user/authorize2",
                    config.withings_account_url.trim_end_matches('/')
                ),
                token_url: format!("{api_url}/v2/oauth2"),
                client_id: config.withings.client_id.clone(),
                client_secret: config.withings.client_secret.clone(),
                redirect_uri: config.withings.redirect_uri.clone(),
                scope: WITHINGS_SCOPE,
                credential_style: CredentialStyle::FormBody,
            },
            api_url,
            http: Client::new(),
        }
    }

    async fn token_grant(
        &self,
        grant: Grant,
        params: &[(&str, &str)],
        fallback_user_id: Option<&str>,
    ) -> Result<TokenRecord, RelayError> {
        let mut form = vec![("action", "requesttoken")];
        form.extend_from_slice(params);

        let envelope: Envelope<TokenBody> =
            token_request(&self.http, &self.settings, grant, &form).await?;
        let body = envelope
            .into_body()
            .map_err(|message| grant.error(Provider::Withings, message))?
            .ok_or_else(|| grant.error(Provider::Withings, "response missing body"))?;

        let user_id = body
            .userid
            .map(RawId::into_string)
            .or_else(|| fallback_user_id.map(str::to_string));

        Ok(TokenRecord {
            user_id: required(grant, Provider::Withings, "userid", user_id)?,
            access_token: required(grant, Provider::Withings, "access_token", body.access_token)?,
            refresh_token: required(grant, Provider::Withings, "refresh_token", body.refresh_token)?,
            scope: body.scope,
            expires_at: body
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    /// Fetch weight and fat-ratio groups recorded between `start` and `end`
    /// (Unix seconds, inclusive).
    pub async fn get_measures(
        &self,
        access_token: &str,
        start: i64,
        end: i64,
    ) -> Result<MeasureBatch, RelayError> {
        let meastypes = format!("{MEASURE_TYPE_WEIGHT},{MEASURE_TYPE_FAT_RATIO}");
        let start = start.to_string();
        let end = end.to_string();

        let body: Option<MeasureBody> = self
            .call(
                "measure",
                access_token,
                &[
                    ("action", "getmeas"),
                    ("meastypes", meastypes.as_str()),
                    ("category", CATEGORY_REAL),
                    ("startdate", start.as_str()),
                    ("enddate", end.as_str()),
                ],
            )
            .await?;

        let batch = body
            .map(|b| MeasureBatch {
                groups: b.measuregrps,
                timezone: b.timezone,
            })
            .unwrap_or_default();
        tracing::debug!(
            groups = batch.groups.len(),
            timezone = batch.timezone.as_deref(),
            "Fetched Withings measure groups"
        );
        Ok(batch)
    }

    /// Register `callback_url` for weight notifications.
    pub async fn subscribe(&self, access_token: &str, callback_url: &str) -> Result<(), RelayError> {
        let _: Option<serde_json::Value> = self
            .call(
                "notify",
                access_token,
                &[
                    ("action", "subscribe"),
                    ("callbackurl", callback_url),
                    ("appli", APPLI_WEIGHT),
                ],
            )
            .await?;

        tracing::info!(callback_url = callback_url, "Withings notification subscribed");
        Ok(())
    }

    /// POST an authenticated API call and unwrap the envelope.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        service: &str,
        access_token: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<T>, RelayError> {
        let upstream = |message: String| RelayError::UpstreamRequest {
            provider: Provider::Withings,
            message,
        };

        let resp = self
            .http
            .post(format!("{}/{}", self.api_url, service))
            .bearer_auth(access_token)
            .form(params)
            .send()
            .await
            .map_err(|e| upstream(format!("{service} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(upstream(format!("{service} returned {status}: {body}")));
        }

        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| upstream(format!("unparsable {service} response: {e}")))?;
        envelope
            .into_body()
            .map_err(|message| upstream(format!("{service} {message}")))
    }
}

#[async_trait]
impl OAuthClient for WithingsClient {
    fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, RelayError> {
        self.token_grant(
            Grant::AuthorizationCode,
            &[
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ],
            None,
        )
        .await
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, RelayError> {
        self.token_grant(
            Grant::RefreshToken,
            &[("refresh_token", record.refresh_token.as_str())],
            Some(record.user_id.as_str()),
        )
        .await
    }
}
