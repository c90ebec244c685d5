use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("stream load failed: {reason}")]
    Load { reason: String },

    #[error("no frames for {}ms, stream considered stale", idle.as_millis())]
    Stale { idle: Duration },

    #[error("stream unavailable after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },

    #[error("invalid stream endpoint `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("unexpected content type `{content_type}` for {url}")]
    InvalidContent { content_type: String, url: String },

    #[error("failed to decode response: {source}")]
    Decode {
        #[from]
        source: serde_json::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("watchdog stopped")]
    Stopped,
}

impl WatchdogError {
    pub fn load(reason: impl Into<String>) -> Self {
        Self::Load {
            reason: reason.into(),
        }
    }

    pub fn invalid_endpoint(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Whether a watchdog should schedule another attempt after this error.
    ///
    /// Every fault raised while loading a stream is retried. Only the terminal
    /// and setup errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExhaustedRetries { .. }
            | Self::InvalidEndpoint { .. }
            | Self::Configuration { .. }
            | Self::Stopped => false,
            Self::Load { .. }
            | Self::Stale { .. }
            | Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::InvalidContent { .. }
            | Self::Decode { .. } => true,
        }
    }
}

pub type Result<T, E = WatchdogError> = std::result::Result<T, E>;
