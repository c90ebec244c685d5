//! # Frame sources
//!
//! A [`FrameSource`] opens the continuously-updating image resource behind a
//! stream URL and yields its body chunks. Every chunk counts as delivered
//! frame data for the watchdog's staleness check.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Result, WatchdogError};
use crate::http::create_stream_client;

/// Body chunks of an open stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Open `url`. Resolves once response headers are accepted.
    async fn open(&self, url: &Url) -> Result<FrameStream>;
}

/// Loads streams over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFrameSource {
    client: Client,
}

impl HttpFrameSource {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_stream_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    #[instrument(skip(self), fields(url = %url), level = "debug")]
    async fn open(&self, url: &Url) -> Result<FrameStream> {
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WatchdogError::http_status(response.status(), url.as_str()));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE)
            && let Ok(ct_str) = content_type.to_str()
            && is_error_page(ct_str)
        {
            warn!(
                url = %url,
                content_type = %ct_str,
                "Response has text Content-Type, likely not an image stream"
            );
            return Err(WatchdogError::InvalidContent {
                content_type: ct_str.to_string(),
                url: url.to_string(),
            });
        }

        debug!(url = %url, status = %response.status(), "Stream response accepted");

        let frames = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(WatchdogError::from));
        Ok(Box::pin(frames))
    }
}

/// Text bodies are error pages, not frames. Unknown and binary types pass.
fn is_error_page(content_type: &str) -> bool {
    let ct_lower = content_type.to_ascii_lowercase();
    ct_lower.starts_with("text/")
        || ct_lower.contains("html")
        || ct_lower.contains("json")
        || ct_lower.contains("xml")
}
