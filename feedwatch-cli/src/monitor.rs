//! One watchdog per configured feed, plus the optional feed status poller.

use std::sync::Arc;

use feedwatch_engine::http::create_api_client;
use feedwatch_engine::{
    ConnectionState, FeedBoard, FeedStatusPoller, FeedsClient, HttpFrameSource, StreamEndpoint,
    StreamStatus, Watchdog, WatchdogHandle,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Retry(RetryTarget),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    All,
    Feed(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "retry" | "r" => match words.next() {
                None | Some("all") => Command::Retry(RetryTarget::All),
                Some(feed_id) => Command::Retry(RetryTarget::Feed(feed_id.to_string())),
            },
            "status" | "s" => Command::Status,
            "quit" | "exit" | "q" => Command::Quit,
            other => {
                return Err(AppError::InvalidInput(format!(
                    "unknown command `{other}` (expected retry <feed|all>, status or quit)"
                )));
            }
        };
        Ok(Some(command))
    }
}

pub struct FeedMonitor {
    watchdogs: Vec<WatchdogHandle>,
    board: watch::Receiver<FeedBoard>,
    tasks: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl FeedMonitor {
    /// Spawn every watchdog and, if enabled, the feed status poller.
    pub fn start(config: &AppConfig, token: CancellationToken) -> Result<Self> {
        let endpoint = StreamEndpoint::new(&config.backend_url)?;
        let source = Arc::new(HttpFrameSource::new(&config.http)?);
        let mut tasks = Vec::new();

        let board = if config.feed_status {
            let client = FeedsClient::new(create_api_client(&config.http)?, &endpoint)?;
            let (poller, board) = FeedStatusPoller::new(client, config.poll_interval());
            tasks.push(poller.spawn(token.clone()));
            board
        } else {
            watch::channel(FeedBoard::default()).1
        };

        let mut watchdogs = Vec::with_capacity(config.feeds.len());
        for feed_id in &config.feeds {
            let handle = Watchdog::builder(feed_id.clone(), endpoint.clone(), source.clone())
                .config(config.watchdog)
                .cancellation_token(token.clone())
                .on_exhausted(|feed_id, err| {
                    error!(feed_id = %feed_id, error = %err, "Stream unavailable, waiting for manual retry");
                })
                .spawn()?;
            tasks.push(tokio::spawn(report_changes(
                handle.subscribe(),
                token.clone(),
            )));
            watchdogs.push(handle);
        }

        info!(
            backend = %endpoint.base(),
            feeds = watchdogs.len(),
            "Feed monitor started"
        );

        Ok(Self {
            watchdogs,
            board,
            tasks,
            token,
        })
    }

    /// Issue a manual retry. Returns how many watchdogs were told to retry.
    pub async fn retry(&self, target: &RetryTarget) -> Result<usize> {
        let mut retried = 0;
        for handle in &self.watchdogs {
            let selected = match target {
                RetryTarget::All => true,
                RetryTarget::Feed(feed_id) => handle.feed_id() == feed_id,
            };
            if selected {
                handle.retry().await?;
                retried += 1;
            }
        }

        if retried == 0
            && let RetryTarget::Feed(feed_id) = target
        {
            return Err(AppError::InvalidInput(format!("unknown feed `{feed_id}`")));
        }
        Ok(retried)
    }

    /// One line per feed, in configured order.
    pub fn report(&self) -> Vec<String> {
        let board = self.board.borrow();
        self.watchdogs
            .iter()
            .map(|handle| render_line(&handle.status(), &board))
            .collect()
    }

    /// Backend reachability line for the status report.
    pub fn backend_line(&self) -> String {
        render_backend(&self.board.borrow())
    }

    /// Tear every watchdog down and wait for background tasks.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.watchdogs {
            handle.teardown().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed during shutdown");
            }
        }
        info!("Feed monitor stopped");
    }
}

/// Log visible status changes of one watchdog until it stops.
async fn report_changes(mut status: watch::Receiver<StreamStatus>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match current.state {
                    ConnectionState::Live => info!(
                        feed_id = %current.feed_id,
                        url = current.url.as_deref().unwrap_or_default(),
                        "Video stream connected"
                    ),
                    ConnectionState::Failed => {}
                    ConnectionState::Connecting | ConnectionState::Reconnecting => info!(
                        feed_id = %current.feed_id,
                        state = %current.state,
                        attempts = current.attempts,
                        fault = current.last_fault.as_deref().unwrap_or_default(),
                        "{}",
                        current.label()
                    ),
                }
            }
        }
    }
}

pub fn render_line(status: &StreamStatus, board: &FeedBoard) -> String {
    let mut line = format!(
        "{:<24} {:<8} {}",
        board.title(&status.feed_id),
        status.connectivity,
        status.label()
    );

    match board.feed(&status.feed_id) {
        Some(feed) => {
            line.push_str(&format!(
                " | {} | {} | density {}%",
                feed.area_label(),
                feed.alert_level.label(),
                feed.density_percentage
            ));
            if feed.alert_level.is_alert() {
                line.push_str(" | ALERT");
            }
        }
        None => line.push_str(" | Offline"),
    }
    line
}

pub fn render_backend(board: &FeedBoard) -> String {
    let updated = board
        .last_update
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "never".to_string());

    match (&board.error, board.online) {
        (_, true) => format!("System Online (last updated {updated})"),
        (Some(error), false) => format!("System Offline (last updated {updated}): {error}"),
        (None, false) => format!("System Offline (last updated {updated})"),
    }
}
