use std::{sync::OnceLock, time::Duration};

use tracing::debug;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// HTTP client for outgoing notifications with a per-request timeout.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    install_rustls_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("display-control/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            debug!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}
