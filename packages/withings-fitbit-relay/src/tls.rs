//! Optional HTTPS listener.
//!
//! The relay always serves plain HTTP. HTTPS is added when the certificate
//! and key load; failure to load them is logged and otherwise ignored.

use std::net::SocketAddr;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsPaths;

/// Install the `ring` crypto provider for rustls. Safe to call twice.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Read the PEM certificate (plus optional chain) and key.
pub async fn load_rustls_config(paths: &TlsPaths) -> std::io::Result<RustlsConfig> {
    let mut cert = tokio::fs::read(&paths.cert).await?;
    if let Some(chain) = &paths.chain {
        if !cert.ends_with(b"\n") {
            cert.push(b'\n');
        }
        cert.extend(tokio::fs::read(chain).await?);
    }
    let key = tokio::fs::read(&paths.key).await?;

    RustlsConfig::from_pem(cert, key).await
}

/// Start the HTTPS listener in the background if TLS material is usable.
///
/// Returns whether a listener was started.
pub async fn spawn_https(paths: &TlsPaths, port: u16, app: Router) -> bool {
    install_crypto_provider();

    let config = match load_rustls_config(paths).await {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                error = %e,
                cert = %paths.cert.display(),
                key = %paths.key.display(),
                "TLS certificate not loaded, serving HTTP only"
            );
            return false;
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("HTTPS listener starting on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum_server::bind_rustls(addr, config)
            .serve(app.into_make_service())
            .await
        {
            tracing::error!(error = %e, "HTTPS listener stopped");
        }
    });
    true
}
