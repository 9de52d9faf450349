//! OAuth2 clients for the two providers.
//!
//! Both providers use the plain authorization-code grant with refresh
//! tokens. They differ in endpoints, in how client credentials are sent
//! (form body vs. HTTP Basic), and in the token response schema; each
//! provider module handles its own schema on top of [`token_request`].

pub mod fitbit;
pub mod pages;
pub mod withings;

pub use fitbit::{BodyLog, BodyLogKind, FitbitClient};
pub use withings::{Measure, MeasureBatch, MeasureGroup, WithingsClient};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::RelayError;
use crate::store::{Provider, TokenRecord, TokenStore};

/// How client credentials are sent to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStyle {
    /// `client_id` and `client_secret` as form fields.
    FormBody,
    /// `Authorization: Basic base64(client_id:client_secret)`.
    BasicAuth,
}

/// OAuth2 grant performed against a token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
        }
    }

    /// The error a failed request of this grant surfaces as.
    pub fn error(&self, provider: Provider, message: impl Into<String>) -> RelayError {
        let message = message.into();
        match self {
            Grant::AuthorizationCode => RelayError::AuthExchange { provider, message },
            Grant::RefreshToken => RelayError::Refresh { provider, message },
        }
    }
}

/// Per-provider OAuth2 parameters.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub provider: Provider,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: &'static str,
    pub credential_style: CredentialStyle,
}

impl OAuthSettings {
    /// Build the consent-screen URL. `state` is echoed back untouched.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(self.scope),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }
}

/// Provider-specific authorization-code and refresh-token exchanges.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    fn settings(&self) -> &OAuthSettings;

    fn provider(&self) -> Provider {
        self.settings().provider
    }

    /// Consent-screen URL for this provider.
    fn authorize_url(&self, state: &str) -> String {
        self.settings().authorize_url(state)
    }

    /// Exchange an authorization code for a token record.
    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, RelayError>;

    /// Exchange the stored refresh token for a new token record.
    ///
    /// The old refresh token is invalidated by the provider and must not be
    /// used again.
    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, RelayError>;
}

/// Exchange a code and persist the resulting record before returning it.
pub async fn exchange_and_store<C>(
    client: &C,
    store: &dyn TokenStore,
    code: &str,
) -> Result<TokenRecord, RelayError>
where
    C: OAuthClient + ?Sized,
{
    let record = client.exchange_code(code).await?;
    store.set_token(client.provider(), &record.user_id, record.clone())?;
    tracing::info!(
        provider = %client.provider(),
        user_id = record.user_id.as_str(),
        "Authorization code exchanged"
    );
    Ok(record)
}

/// Refresh a record and persist the replacement before returning it.
///
/// The new record replaces the old one wholesale, keyed by the old
/// record's user ID.
pub async fn refresh_and_store<C>(
    client: &C,
    store: &dyn TokenStore,
    record: &TokenRecord,
) -> Result<TokenRecord, RelayError>
where
    C: OAuthClient + ?Sized,
{
    let refreshed = client.refresh(record).await?;
    store.set_token(client.provider(), &record.user_id, refreshed.clone())?;
    tracing::info!(
        provider = %client.provider(),
        user_id = record.user_id.as_str(),
        "Token refreshed"
    );
    Ok(refreshed)
}

/// POST a grant to the token endpoint and parse the JSON response.
///
/// Transport errors, non-2xx statuses and unparsable bodies all map to the
/// grant's error variant.
pub(crate) async fn token_request<T: DeserializeOwned>(
    http: &Client,
    settings: &OAuthSettings,
    grant: Grant,
    params: &[(&str, &str)],
) -> Result<T, RelayError> {
    let provider = settings.provider;

    let mut form: Vec<(&str, &str)> = vec![("grant_type", grant.as_str())];
    form.extend_from_slice(params);

    let mut request = http.post(&settings.token_url);
    match settings.credential_style {
        CredentialStyle::FormBody => {
            form.push(("client_id", settings.client_id.as_str()));
            form.push(("client_secret", settings.client_secret.as_str()));
        }
        CredentialStyle::BasicAuth => {
            request = request.basic_auth(&settings.client_id, Some(&settings.client_secret));
        }
    }

    let resp = request
        .form(&form)
        .send()
        .await
        .map_err(|e| grant.error(provider, format!("token request failed: {e}")))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(grant.error(provider, format!("status {status}: {body}")));
    }

    resp.json::<T>()
        .await
        .map_err(|e| grant.error(provider, format!("unparsable token response: {e}")))
}

/// A user ID the provider may send as either a JSON string or number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    pub(crate) fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// `deserialize_with` helper for string-or-number user IDs.
pub(crate) fn deserialize_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_string)
}

/// Require a non-empty field in a token response.
pub(crate) fn required(
    grant: Grant,
    provider: Provider,
    field: &str,
    value: Option<String>,
) -> Result<String, RelayError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| grant.error(provider, format!("response missing {field}")))
}
