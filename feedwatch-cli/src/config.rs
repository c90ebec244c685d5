use std::path::{Path, PathBuf};
use std::time::Duration;

use feedwatch_engine::feeds::{DEFAULT_FEED_IDS, DEFAULT_POLL_INTERVAL};
use feedwatch_engine::{HttpConfig, WatchdogConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub feeds: Vec<String>,
    /// Poll `/api/feeds` for crowd figures.
    pub feed_status: bool,
    pub poll_interval_ms: u64,
    pub watchdog: WatchdogConfig,
    pub http: HttpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            feeds: DEFAULT_FEED_IDS.iter().map(|id| id.to_string()).collect(),
            feed_status: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            watchdog: WatchdogConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content, &path)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<config dir>/feedwatch/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("feedwatch").join("config.toml"))
    }

    /// Command-line flags take precedence over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(url) = &args.backend_url {
            self.backend_url = url.clone();
        }
        if !args.feeds.is_empty() {
            self.feeds = args.feeds.clone();
        }
        if let Some(max_attempts) = args.max_attempts {
            self.watchdog.max_attempts = max_attempts;
        }
        if let Some(base_delay_ms) = args.base_delay_ms {
            self.watchdog.base_delay_ms = base_delay_ms;
        }
        if let Some(stale_timeout_ms) = args.stale_timeout_ms {
            self.watchdog.stale_timeout_ms = stale_timeout_ms;
        }
        if args.no_feed_status {
            self.feed_status = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(AppError::InvalidInput("no feeds configured".to_string()));
        }
        if let Some(blank) = self.feeds.iter().find(|id| id.trim().is_empty()) {
            return Err(AppError::InvalidInput(format!("invalid feed id `{blank}`")));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::InvalidInput(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        self.watchdog.validate()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
