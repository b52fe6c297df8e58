//! HTTPS listener setup (rustls with the ring provider).

use crate::config::TlsConfig;
use crate::errors::{AppError, AppResult};
use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::CryptoProvider;
use std::path::Path;
use tracing::debug;

fn install_crypto_provider() {
    if CryptoProvider::get_default().is_none() {
        // another caller may have installed one in the meantime
        if rustls::crypto::ring::default_provider().install_default().is_ok() {
            debug!("installed ring as the rustls crypto provider");
        }
    }
}

/// Load the PEM certificate chain and private key named by `tls`.
pub async fn load_rustls_config(tls: &TlsConfig) -> AppResult<RustlsConfig> {
    for (what, path) in [("certificate", &tls.cert), ("private key", &tls.key)] {
        if !Path::new(path).is_file() {
            return Err(AppError::Config(format!("TLS {} not found: {}", what, path)));
        }
    }

    install_crypto_provider();
    RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| {
            AppError::Config(format!(
                "cannot load TLS certificate '{}' and key '{}': {}",
                tls.cert, tls.key, e
            ))
        })
}
