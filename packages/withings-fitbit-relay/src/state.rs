//! Shared server state.
//!
//! Everything a handler needs is cloned out of `AppState`; the inner parts
//! are reference counted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::{RelayConfig, LINK_STATE_TTL_SECS};
use crate::oauth::{FitbitClient, WithingsClient};
use crate::store::TokenStore;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub store: Arc<dyn TokenStore>,
    pub withings: Arc<WithingsClient>,
    pub fitbit: Arc<FitbitClient>,
    pub pending: PendingLinks,
}

impl AppState {
    /// Build the state, wiring both provider clients from the configuration.
    pub fn new(config: RelayConfig, store: Arc<dyn TokenStore>) -> Self {
        let withings = WithingsClient::new(&config);
        let fitbit = FitbitClient::new(&config);
        Self {
            config: Arc::new(config),
            store,
            withings: Arc::new(withings),
            fitbit: Arc::new(fitbit),
            pending: PendingLinks::new(),
        }
    }
}

/// A Withings authorization waiting for its Fitbit counterpart.
#[derive(Debug, Clone)]
pub struct PendingLink {
    pub withings_user_id: String,
    pub created_at: DateTime<Utc>,
}

impl PendingLink {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() - self.created_at.timestamp() > LINK_STATE_TTL_SECS
    }
}

/// Server-side correlation tokens carrying the Withings user ID across the
/// Fitbit authorization redirect.
///
/// The nonce travels as the OAuth `state` parameter; the user ID itself
/// never leaves the server.
#[derive(Clone, Default)]
pub struct PendingLinks {
    links: Arc<DashMap<String, PendingLink>>,
}

impl PendingLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new nonce for a Withings user.
    pub fn issue(&self, withings_user_id: &str) -> String {
        let nonce = Uuid::new_v4().to_string();
        self.links.insert(
            nonce.clone(),
            PendingLink {
                withings_user_id: withings_user_id.to_string(),
                created_at: Utc::now(),
            },
        );
        tracing::debug!(
            nonce = nonce.as_str(),
            pending = self.links.len(),
            "Pending link issued"
        );
        nonce
    }

    /// Look up a nonce without consuming it.
    ///
    /// Returns None if not found or expired.
    pub fn peek(&self, nonce: &str) -> Option<String> {
        let link = self.links.get(nonce)?;
        if link.is_expired(Utc::now()) {
            return None;
        }
        Some(link.withings_user_id.clone())
    }

    /// Retrieve and remove a nonce.
    ///
    /// Returns None if not found or expired.
    pub fn take(&self, nonce: &str) -> Option<String> {
        let (_, link) = self.links.remove(nonce)?;
        if link.is_expired(Utc::now()) {
            tracing::warn!(nonce = nonce, "Pending link expired");
            return None;
        }
        Some(link.withings_user_id)
    }

    /// Drop expired nonces.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.links.retain(|_, link| !link.is_expired(now));
    }

    /// Number of outstanding nonces.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[cfg(test)]
    fn insert_at(&self, nonce: &str, withings_user_id: &str, created_at: DateTime<Utc>) {
        self.links.insert(
            nonce.to_string(),
            PendingLink {
                withings_user_id: withings_user_id.to_string(),
                created_at,
            },
        );
    }
}
