use std::sync::OnceLock;

use reqwest::Client;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{Result, WatchdogError};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client used for stream loads.
///
/// No overall request timeout: a stream response stays open for as long as the
/// feed is live. Stalls are caught by the watchdog's staleness check instead.
pub fn create_stream_client(config: &HttpConfig) -> Result<Client> {
    install_rustls_provider();
    apply_proxy(
        Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout()),
        config,
    )
    .build()
    .map_err(WatchdogError::from)
}

/// Build the client used for short JSON requests.
pub fn create_api_client(config: &HttpConfig) -> Result<Client> {
    install_rustls_provider();
    apply_proxy(
        Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout()),
        config,
    )
    .build()
    .map_err(WatchdogError::from)
}

fn apply_proxy(builder: reqwest::ClientBuilder, config: &HttpConfig) -> reqwest::ClientBuilder {
    if let Some(url) = config.proxy.as_deref() {
        return match reqwest::Proxy::all(url) {
            Ok(proxy) => builder.proxy(proxy),
            Err(error) => {
                warn!(proxy_url = %url, error = %error, "Invalid proxy URL; disabling proxy");
                builder.no_proxy()
            }
        };
    }

    if config.use_system_proxy {
        builder
    } else {
        builder.no_proxy()
    }
}
