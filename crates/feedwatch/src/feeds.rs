//! Feed status polling.
//!
//! The backend publishes per-feed crowd figures at `GET <base>/api/feeds`.
//! [`FeedStatusPoller`] refreshes them on a fixed interval into a
//! [`FeedBoard`]. Alert levels are shown as received; nothing here computes them.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoint::StreamEndpoint;
use crate::error::{Result, WatchdogError};

/// Default refresh period of the feed board.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default camera feeds of a deployment.
pub const DEFAULT_FEED_IDS: [&str; 5] = ["feed_1", "feed_2", "feed_3", "feed_4", "feed_5"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }

    /// Whether the feed tile should show an alert marker.
    pub fn is_alert(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Crowd figures reported for one feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedData {
    pub name: String,
    pub current_count: u32,
    pub max_capacity: u32,
    pub density_percentage: f64,
    pub alert_level: AlertLevel,
    pub last_updated: String,
    pub location: GeoPoint,
    pub area: String,
}

impl FeedData {
    /// Area name as shown on a tile (`north_gate` → `NORTH GATE`).
    pub fn area_label(&self) -> String {
        self.area.replacen('_', " ", 1).to_uppercase()
    }
}

#[derive(Debug, Default, Deserialize)]
struct FeedsResponse {
    #[serde(default)]
    feeds: BTreeMap<String, FeedData>,
}

/// Fallback title for a feed the backend has not reported (`feed_1` → `FEED 1`).
pub fn display_name(feed_id: &str) -> String {
    feed_id.replacen('_', " ", 1).to_uppercase()
}

/// Latest view of every reported feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedBoard {
    pub feeds: BTreeMap<String, FeedData>,
    pub last_update: Option<DateTime<Utc>>,
    /// Whether the last poll reached the backend.
    pub online: bool,
    pub error: Option<String>,
}

impl FeedBoard {
    pub fn feed(&self, feed_id: &str) -> Option<&FeedData> {
        self.feeds.get(feed_id)
    }

    /// Tile title: the reported name, or the id-derived fallback.
    pub fn title(&self, feed_id: &str) -> String {
        self.feed(feed_id)
            .map(|feed| feed.name.clone())
            .unwrap_or_else(|| display_name(feed_id))
    }

    fn record_success(&mut self, feeds: BTreeMap<String, FeedData>, at: DateTime<Utc>) {
        self.feeds = feeds;
        self.last_update = Some(at);
        self.online = true;
        self.error = None;
    }

    /// Keep the last known feeds so tiles do not blank out on a missed poll.
    fn record_failure(&mut self, error: &WatchdogError) {
        self.online = false;
        self.error = Some(error.to_string());
    }
}

/// Client for the backend's feed status endpoint.
#[derive(Debug, Clone)]
pub struct FeedsClient {
    client: Client,
    url: Url,
}

impl FeedsClient {
    pub fn new(client: Client, endpoint: &StreamEndpoint) -> Result<Self> {
        Ok(Self {
            client,
            url: endpoint.join("api/feeds")?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn fetch(&self) -> Result<BTreeMap<String, FeedData>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WatchdogError::http_status(
                response.status(),
                self.url.as_str(),
            ));
        }

        let body = response.bytes().await?;
        parse_feeds(&body)
    }
}

fn parse_feeds(body: &[u8]) -> Result<BTreeMap<String, FeedData>> {
    let response: FeedsResponse = serde_json::from_slice(body)?;
    Ok(response.feeds)
}

/// Periodically refreshes a [`FeedBoard`].
pub struct FeedStatusPoller {
    client: FeedsClient,
    interval: Duration,
    board: watch::Sender<FeedBoard>,
}

impl FeedStatusPoller {
    pub fn new(client: FeedsClient, interval: Duration) -> (Self, watch::Receiver<FeedBoard>) {
        let (board, rx) = watch::channel(FeedBoard::default());
        (
            Self {
                client,
                interval,
                board,
            },
            rx,
        )
    }

    /// Poll once now, then every interval until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    async fn run(self, token: CancellationToken) {
        info!(url = %self.client.url(), interval_ms = self.interval.as_millis() as u64, "Starting feed status poller");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Feed status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // A slow backend must not hold up shutdown.
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Feed status poller cancelled mid-fetch");
                            break;
                        }
                        _ = self.refresh() => {}
                    }
                }
            }
        }
    }

    /// Fetch once and fold the outcome into the board.
    pub async fn refresh(&self) {
        match self.client.fetch().await {
            Ok(feeds) => {
                debug!(count = feeds.len(), "Feed status refreshed");
                self.board
                    .send_modify(|board| board.record_success(feeds, Utc::now()));
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch feed status");
                self.board.send_modify(|board| board.record_failure(&e));
            }
        }
    }
}
