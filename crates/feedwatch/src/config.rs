use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchdogError};

/// Reconnect ceiling before a stream is reported unavailable.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff unit: the first reconnect waits this long, each following one twice as long.
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;

/// A live stream without frames for longer than this is treated as frozen.
pub const DEFAULT_STALE_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_USER_AGENT: &str = concat!("feedwatch/", env!("CARGO_PKG_VERSION"));

/// Per-stream watchdog thresholds.
///
/// Recognized options keep their dashboard names (`maxAttempts`, `baseDelayMs`,
/// `staleTimeoutMs`) so existing configuration can be reused verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchdogConfig {
    /// Retry ceiling.
    pub max_attempts: u32,
    /// Backoff unit in milliseconds.
    pub base_delay_ms: u64,
    /// Inactivity threshold in milliseconds.
    pub stale_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT_MS,
        }
    }
}

impl WatchdogConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    /// Period of the staleness check. Half the timeout, so a frozen stream is
    /// caught within 1.5x the threshold.
    pub fn stale_check_interval(&self) -> Duration {
        (self.stale_timeout() / 2).max(Duration::from_millis(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(WatchdogError::configuration("baseDelayMs must be positive"));
        }
        if self.stale_timeout_ms == 0 {
            return Err(WatchdogError::configuration(
                "staleTimeoutMs must be positive",
            ));
        }
        Ok(())
    }
}

/// HTTP client options shared by the frame source and the feed status client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Time allowed to establish a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Deadline for non-streaming requests (`/api/feeds`), in milliseconds.
    pub request_timeout_ms: u64,
    pub user_agent: String,
    /// Explicit proxy URL. `None` falls back to system proxy settings when
    /// `use_system_proxy` is set.
    pub proxy: Option<String>,
    pub use_system_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_constants() {
        let config = WatchdogConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay(), Duration::from_secs(2));
        assert_eq!(config.stale_timeout(), Duration::from_secs(10));
        assert_eq!(config.stale_check_interval(), Duration::from_secs(5));
    }

    #[test]
    fn deserializes_camel_case_options() {
        let config: WatchdogConfig =
            serde_json::from_str(r#"{"maxAttempts": 3, "baseDelayMs": 500, "staleTimeoutMs": 4000}"#)
                .unwrap();
        assert_eq!(
            config,
            WatchdogConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                stale_timeout_ms: 4000,
            }
        );
    }

    #[test]
    fn missing_options_fall_back_to_defaults() {
        let config: WatchdogConfig = serde_json::from_str(r#"{"maxAttempts": 8}"#).unwrap();
        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.stale_timeout_ms, DEFAULT_STALE_TIMEOUT_MS);
    }

    #[test]
    fn zero_delays_are_rejected() {
        let config = WatchdogConfig {
            base_delay_ms: 0,
            ..WatchdogConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WatchdogError::Configuration { .. })
        ));
        assert!(WatchdogConfig::default().validate().is_ok());
    }
}
