//! Withings → Fitbit relay server.
//!
//! Serves the account-linking pages and the Withings webhook over HTTP, and
//! over HTTPS as well when a certificate is available.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use withings_fitbit_relay::{api, tls, AppState, Args, JsonFileStore, RelayConfig};

/// Interval between sweeps of expired pending links.
const CLEANUP_INTERVAL_SECS: u64 = 300;

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "withings_fitbit_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match RelayConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let store = JsonFileStore::new(config.data_file.clone());
    let loaded = store.load_from_disk();
    tracing::info!(
        tokens = loaded,
        subscriptions = store.subscription_count(),
        "Token store ready"
    );

    let http_port = config.http_port;
    let https_port = config.https_port;
    let tls_paths = config.tls.clone();
    let state = AppState::new(config, Arc::new(store));

    // Spawn periodic cleanup task
    let pending = state.pending.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            pending.cleanup_expired();
        }
    });

    let app = api::router(state);

    tls::spawn_https(&tls_paths, https_port, app.clone()).await;

    let addr = format!("0.0.0.0:{}", http_port);
    tracing::info!("Withings-Fitbit relay starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
