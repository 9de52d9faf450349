//! Relay configuration.
//!
//! Everything is read from command-line flags with environment fallbacks.
//! Provider credentials are optional at the parser level so that a missing
//! value is reported as one `RelayError::Config` listing every missing
//! variable, instead of clap stopping at the first one.

use std::path::PathBuf;

use clap::Parser;

use crate::error::RelayError;

/// Default route prefix, kept from the first deployment's public URLs.
pub const DEFAULT_ROUTE_PREFIX: &str = "/withings-to-fitbit";

/// Pending Withings → Fitbit handoff TTL in seconds (30 minutes).
pub const LINK_STATE_TTL_SECS: i64 = 1800;

/// Withings OAuth2 scope needed to read body measurements.
pub const WITHINGS_SCOPE: &str = "user.metrics";

/// Fitbit OAuth2 scope needed to log weight and body fat.
pub const FITBIT_SCOPE: &str = "weight";

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug, Clone)]
#[command(
    name = "withings-fitbit-relay",
    version,
    about = "Relay Withings scale measurements to Fitbit"
)]
pub struct Args {
    /// Withings OAuth2 client ID
    #[arg(long, env = "WITHINGS_CLIENT_ID")]
    pub withings_client_id: Option<String>,

    /// Withings OAuth2 consumer secret
    #[arg(long, env = "WITHINGS_CONSUMER_SECRET", hide_env_values = true)]
    pub withings_consumer_secret: Option<String>,

    /// Redirect URI registered with Withings (must point at /auth/withings)
    #[arg(long, env = "WITHINGS_REDIRECT_URI")]
    pub withings_redirect_uri: Option<String>,

    /// Fitbit OAuth2 client ID
    #[arg(long, env = "FITBIT_CLIENT_ID")]
    pub fitbit_client_id: Option<String>,

    /// Fitbit OAuth2 client secret
    #[arg(long, env = "FITBIT_CLIENT_SECRET", hide_env_values = true)]
    pub fitbit_client_secret: Option<String>,

    /// Redirect URI registered with Fitbit (must point at /auth/fitbit)
    #[arg(long, env = "FITBIT_REDIRECT_URI")]
    pub fitbit_redirect_uri: Option<String>,

    /// Public base URL of this relay, used to build the Withings webhook URL.
    /// Without it no notification subscription is registered.
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Path prefix all relay routes are mounted under
    #[arg(long, default_value = DEFAULT_ROUTE_PREFIX, env = "ROUTE_PREFIX")]
    pub route_prefix: String,

    /// Plain HTTP port
    #[arg(long, default_value_t = 80, env = "HTTP_PORT")]
    pub http_port: u16,

    /// HTTPS port, used only when the TLS certificate loads
    #[arg(long, default_value_t = 443, env = "HTTPS_PORT")]
    pub https_port: u16,

    /// PEM certificate file
    #[arg(long, default_value = "cert.pem", env = "TLS_CERT_PATH")]
    pub tls_cert_path: PathBuf,

    /// PEM private key file
    #[arg(long, default_value = "key.pem", env = "TLS_KEY_PATH")]
    pub tls_key_path: PathBuf,

    /// Optional PEM intermediate chain, appended to the certificate
    #[arg(long, env = "TLS_CHAIN_PATH")]
    pub tls_chain_path: Option<PathBuf>,

    /// JSON document holding tokens and subscriptions
    #[arg(long, default_value = "db.json", env = "DATA_FILE")]
    pub data_file: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Withings account host (authorization page)
    #[arg(long, default_value = "https://account.withings.com", env = "WITHINGS_ACCOUNT_URL", hide = true)]
    pub withings_account_url: String,

    /// Withings API host
    #[arg(long, default_value = "https://wbsapi.withings.net", env = "WITHINGS_API_URL", hide = true)]
    pub withings_api_url: String,

    /// Fitbit web host (authorization page)
    #[arg(long, default_value = "https://www.fitbit.com", env = "FITBIT_WWW_URL", hide = true)]
    pub fitbit_www_url: String,

    /// Fitbit API host
    #[arg(long, default_value = "https://api.fitbit.com", env = "FITBIT_API_URL", hide = true)]
    pub fitbit_api_url: String,
}

// ── Resolved Configuration ────────────────────────────────────────────────────

/// OAuth2 client credentials for one provider.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// TLS material locations.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub chain: Option<PathBuf>,
}

/// Validated relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub withings: ClientCredentials,
    pub fitbit: ClientCredentials,
    pub public_base_url: Option<String>,
    /// Normalized: empty, or starts with `/` and has no trailing `/`.
    pub route_prefix: String,
    pub http_port: u16,
    pub https_port: u16,
    pub tls: TlsPaths,
    pub data_file: Option<PathBuf>,
    pub log_json: bool,
    pub withings_account_url: String,
    pub withings_api_url: String,
    pub fitbit_www_url: String,
    pub fitbit_api_url: String,
}

impl RelayConfig {
    /// Validate parsed arguments.
    ///
    /// Fails with `RelayError::Config` naming every missing required variable.
    pub fn from_args(args: Args) -> Result<Self, RelayError> {
        let required = [
            ("WITHINGS_CLIENT_ID", &args.withings_client_id),
            ("WITHINGS_CONSUMER_SECRET", &args.withings_consumer_secret),
            ("WITHINGS_REDIRECT_URI", &args.withings_redirect_uri),
            ("FITBIT_CLIENT_ID", &args.fitbit_client_id),
            ("FITBIT_CLIENT_SECRET", &args.fitbit_client_secret),
            ("FITBIT_REDIRECT_URI", &args.fitbit_redirect_uri),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(RelayError::Config(missing.join(", ")));
        }

        Ok(Self {
            withings: ClientCredentials {
                client_id: args.withings_client_id.unwrap_or_default(),
                client_secret: args.withings_consumer_secret.unwrap_or_default(),
                redirect_uri: args.withings_redirect_uri.unwrap_or_default(),
            },
            fitbit: ClientCredentials {
                client_id: args.fitbit_client_id.unwrap_or_default(),
                client_secret: args.fitbit_client_secret.unwrap_or_default(),
                redirect_uri: args.fitbit_redirect_uri.unwrap_or_default(),
            },
            public_base_url: args
                .public_base_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| url.trim_end_matches('/').to_string()),
            route_prefix: normalize_prefix(&args.route_prefix),
            http_port: args.http_port,
            https_port: args.https_port,
            tls: TlsPaths {
                cert: args.tls_cert_path,
                key: args.tls_key_path,
                chain: args.tls_chain_path,
            },
            data_file: Some(args.data_file),
            log_json: args.log_json,
            withings_account_url: args.withings_account_url,
            withings_api_url: args.withings_api_url,
            fitbit_www_url: args.fitbit_www_url,
            fitbit_api_url: args.fitbit_api_url,
        })
    }

    /// Absolute path of a relay route, including the prefix.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", self.route_prefix, path)
    }

    /// Webhook URL registered with Withings, if a public base URL is known.
    pub fn webhook_url(&self) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}{}", base, self.route("/webhook")))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
