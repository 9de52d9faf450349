//! Fitbit OAuth2 and body log client.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::{required, token_request, CredentialStyle, Grant, OAuthClient, OAuthSettings};
use crate::config::{RelayConfig, FITBIT_SCOPE};
use crate::error::RelayError;
use crate::store::{Provider, TokenRecord};

/// Fitbit token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<String>,
    scope: Option<String>,
    expires_in: Option<i64>,
}

/// Body log endpoints the relay writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLogKind {
    Weight,
    Fat,
}

impl BodyLogKind {
    /// Path segment and form field name, which Fitbit keeps identical.
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyLogKind::Weight => "weight",
            BodyLogKind::Fat => "fat",
        }
    }
}

/// One entry to log on Fitbit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyLog {
    pub kind: BodyLogKind,
    /// Decimal string with two fraction digits (kg or %).
    pub value: String,
    /// `yyyy-MM-dd`
    pub date: String,
    /// `HH:mm:ss`
    pub time: String,
}

/// Fitbit Web API client.
pub struct FitbitClient {
    settings: OAuthSettings,
    api_url: String,
    http: Client,
}

impl FitbitClient {
    pub fn new(config: &RelayConfig) -> Self {
        let api_url = config.fitbit_api_url.trim_end_matches('/').to_string();
        Self {
            settings: OAuthSettings {
                provider: Provider::Fitbit,
                authorize_url: format!(
                    "{}/oauth2/authorize",
                    config.fitbit_www_url.trim_end_matches('/')
                ),
                token_url: format!("{api_url}/oauth2/token"),
                client_id: config.fitbit.client_id.clone(),
                client_secret: config.fitbit.client_secret.clone(),
                redirect_uri: config.fitbit.redirect_uri.clone(),
                scope: FITBIT_SCOPE,
                credential_style: CredentialStyle::BasicAuth,
            },
            api_url,
            http: Client::new(),
        }
    }

    fn into_record(
        grant: Grant,
        resp: TokenResponse,
        fallback_user_id: Option<&str>,
    ) -> Result<TokenRecord, RelayError> {
        let user_id = resp
            .user_id
            .or_else(|| fallback_user_id.map(str::to_string));

        Ok(TokenRecord {
            user_id: required(grant, Provider::Fitbit, "user_id", user_id)?,
            access_token: required(grant, Provider::Fitbit, "access_token", resp.access_token)?,
            refresh_token: required(grant, Provider::Fitbit, "refresh_token", resp.refresh_token)?,
            scope: resp.scope,
            expires_at: resp
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    /// Create a body log entry for the authorized user.
    ///
    /// No `Accept-Language` header is sent, so Fitbit reads weight as kg.
    pub async fn log_body(&self, access_token: &str, entry: &BodyLog) -> Result<(), RelayError> {
        let kind = entry.kind.as_str();
        let upstream = |message: String| RelayError::UpstreamRequest {
            provider: Provider::Fitbit,
            message,
        };

        let resp = self
            .http
            .post(format!("{}/1/user/-/body/log/{}.json", self.api_url, kind))
            .bearer_auth(access_token)
            .form(&[
                (kind, entry.value.as_str()),
                ("date", entry.date.as_str()),
                ("time", entry.time.as_str()),
            ])
            .send()
            .await
            .map_err(|e| upstream(format!("{kind} log request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(upstream(format!("{kind} log returned {status}: {body}")));
        }

        tracing::info!(
            kind = kind,
            value = entry.value.as_str(),
            date = entry.date.as_str(),
            time = entry.time.as_str(),
            "Fitbit body log created"
        );
        Ok(())
    }
}

#[async_trait]
impl OAuthClient for FitbitClient {
    fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, RelayError> {
        let grant = Grant::AuthorizationCode;
        let resp: TokenResponse = token_request(
            &self.http,
            &self.settings,
            grant,
            &[
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ],
        )
        .await?;
        Self::into_record(grant, resp, None)
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, RelayError> {
        let grant = Grant::RefreshToken;
        let resp: TokenResponse = token_request(
            &self.http,
            &self.settings,
            grant,
            &[("refresh_token", record.refresh_token.as_str())],
        )
        .await?;
        Self::into_record(grant, resp, Some(record.user_id.as_str()))
    }
}
