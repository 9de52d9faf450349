//! Token store for OAuth credentials and subscription links.
//!
//! Uses DashMap for concurrent access. The whole store is one JSON document
//! (`db.json` by default) that is loaded once at startup and rewritten on
//! every mutation. There is no transaction boundary across requests: two
//! writes to the same key apply in completion order, last write wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// The two providers the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Measurement source.
    Withings,
    /// Measurement destination.
    Fitbit,
}

impl Provider {
    /// Get the provider name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Withings => "withings",
            Provider::Fitbit => "fitbit",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OAuth credentials issued by a provider for one of its users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Provider-specific user identifier the tokens were issued for.
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Informational only; refresh never consults it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistent key-value store for tokens and subscription links.
pub trait TokenStore: Send + Sync {
    /// Get the token record for a provider user.
    fn get_token(&self, provider: Provider, user_id: &str) -> Option<TokenRecord>;

    /// Store a token record, replacing any previous one for the same user.
    fn set_token(
        &self,
        provider: Provider,
        user_id: &str,
        record: TokenRecord,
    ) -> Result<(), RelayError>;

    /// Get the Fitbit user linked to a Withings user.
    fn get_link(&self, withings_user_id: &str) -> Option<String>;

    /// Link a Withings user to a Fitbit user.
    fn set_link(&self, withings_user_id: &str, fitbit_user_id: &str) -> Result<(), RelayError>;
}

/// On-disk persistence format.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedData {
    #[serde(default)]
    withings_tokens: HashMap<String, TokenRecord>,
    #[serde(default)]
    fitbit_tokens: HashMap<String, TokenRecord>,
    /// Withings user ID → Fitbit user ID.
    #[serde(default)]
    subscriptions: HashMap<String, String>,
}

/// JSON-file-backed token store with an in-memory cache.
///
/// When `path` is None, data lives in memory only.
#[derive(Clone)]
pub struct JsonFileStore {
    withings_tokens: Arc<DashMap<String, TokenRecord>>,
    fitbit_tokens: Arc<DashMap<String, TokenRecord>>,
    subscriptions: Arc<DashMap<String, String>>,
    /// Serializes flushes so two writers never share the temp file.
    flush_lock: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

impl JsonFileStore {
    /// Create a new store persisting to `path`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            withings_tokens: Arc::new(DashMap::new()),
            fitbit_tokens: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
            flush_lock: Arc::new(Mutex::new(())),
            path,
        }
    }

    /// Create a store that never touches disk.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    fn tokens(&self, provider: Provider) -> &DashMap<String, TokenRecord> {
        match provider {
            Provider::Withings => &self.withings_tokens,
            Provider::Fitbit => &self.fitbit_tokens,
        }
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Load the store document from disk.
    ///
    /// Called once at startup. If the file doesn't exist or is corrupt,
    /// logs a warning and starts with an empty store. Returns the number
    /// of token records loaded.
    pub fn load_from_disk(&self) -> usize {
        let path = match &self.path {
            Some(p) => p,
            None => {
                tracing::info!("No data file configured, running in-memory only");
                return 0;
            }
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "No existing data file, starting fresh");
            return 0;
        }

        let data = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PersistedData>(&contents) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.display(),
                        "Failed to parse data file, starting fresh"
                    );
                    return 0;
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read data file, starting fresh"
                );
                return 0;
            }
        };

        let count = data.withings_tokens.len() + data.fitbit_tokens.len();
        let links = data.subscriptions.len();
        for (user_id, record) in data.withings_tokens {
            self.withings_tokens.insert(user_id, record);
        }
        for (user_id, record) in data.fitbit_tokens {
            self.fitbit_tokens.insert(user_id, record);
        }
        for (withings_user_id, fitbit_user_id) in data.subscriptions {
            self.subscriptions.insert(withings_user_id, fitbit_user_id);
        }

        tracing::info!(
            tokens = count,
            subscriptions = links,
            path = %path.display(),
            "Token store loaded from disk"
        );
        count
    }

    /// Write the current state to disk.
    ///
    /// Atomic write: temp file, then rename.
    fn persist_to_disk(&self) -> Result<(), RelayError> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        let _guard = self
            .flush_lock
            .lock()
            .map_err(|_| RelayError::Store("flush lock poisoned".into()))?;

        let data = PersistedData {
            withings_tokens: snapshot(&self.withings_tokens),
            fitbit_tokens: snapshot(&self.fitbit_tokens),
            subscriptions: snapshot(&self.subscriptions),
        };
        let json = serde_json::to_string_pretty(&data)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            tracing::error!(error = %e, path = %path.display(), "Failed to rename temp data file");
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// Number of stored token records for a provider.
    pub fn token_count(&self, provider: Provider) -> usize {
        self.tokens(provider).len()
    }

    /// Number of subscription links.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn snapshot<V: Clone>(map: &DashMap<String, V>) -> HashMap<String, V> {
    map.iter()
        .map(|r| (r.key().clone(), r.value().clone()))
        .collect()
}

impl TokenStore for JsonFileStore {
    fn get_token(&self, provider: Provider, user_id: &str) -> Option<TokenRecord> {
        self.tokens(provider).get(user_id).map(|r| r.clone())
    }

    fn set_token(
        &self,
        provider: Provider,
        user_id: &str,
        record: TokenRecord,
    ) -> Result<(), RelayError> {
        self.tokens(provider).insert(user_id.to_string(), record);
        tracing::debug!(provider = %provider, user_id = user_id, "Token record stored");
        self.persist_to_disk()
    }

    fn get_link(&self, withings_user_id: &str) -> Option<String> {
        self.subscriptions.get(withings_user_id).map(|r| r.clone())
    }

    fn set_link(&self, withings_user_id: &str, fitbit_user_id: &str) -> Result<(), RelayError> {
        self.subscriptions
            .insert(withings_user_id.to_string(), fitbit_user_id.to_string());
        tracing::info!(
            withings_user_id = withings_user_id,
            fitbit_user_id = fitbit_user_id,
            "Subscription link stored"
        );
        self.persist_to_disk()
    }
}
