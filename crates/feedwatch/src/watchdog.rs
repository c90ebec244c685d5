//! Watchdog task driving one [`StreamSession`].
//!
//! Each feed gets its own task that owns its session, so nothing is shared
//! between feeds and no locking is needed. The task multiplexes:
//!
//! - manual retry commands from the [`WatchdogHandle`]
//! - load reports from the load task spawned for the current URL
//! - the reconnect timer (at most one armed)
//! - the periodic staleness check
//! - cancellation (teardown)
//!
//! Status snapshots are published through a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::total_backoff;
use crate::config::WatchdogConfig;
use crate::endpoint::StreamEndpoint;
use crate::error::{Result, WatchdogError};
use crate::session::{Effect, StreamSession, StreamStatus, WatchdogEvent};
use crate::source::FrameSource;

/// Capacity of the load-report channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the command mailbox.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Invoked once each time a stream exhausts its retries.
pub type ExhaustedCallback = Arc<dyn Fn(&str, &WatchdogError) + Send + Sync>;

#[derive(Debug)]
enum Command {
    Retry,
}

/// Reconnect timer armed for a given load generation.
#[derive(Debug, Clone, Copy)]
struct ReconnectTimer {
    deadline: Instant,
    generation: u64,
}

/// Entry point for spawning watchdogs.
pub struct Watchdog;

impl Watchdog {
    pub fn builder(
        feed_id: impl Into<String>,
        endpoint: StreamEndpoint,
        source: Arc<dyn FrameSource>,
    ) -> WatchdogBuilder {
        WatchdogBuilder {
            feed_id: feed_id.into(),
            endpoint,
            source,
            config: WatchdogConfig::default(),
            on_exhausted: None,
            parent_token: None,
        }
    }
}

pub struct WatchdogBuilder {
    feed_id: String,
    endpoint: StreamEndpoint,
    source: Arc<dyn FrameSource>,
    config: WatchdogConfig,
    on_exhausted: Option<ExhaustedCallback>,
    parent_token: Option<CancellationToken>,
}

impl WatchdogBuilder {
    pub fn config(mut self, config: WatchdogConfig) -> Self {
        self.config = config;
        self
    }

    /// Called with the feed id when automatic retries stop.
    pub fn on_exhausted<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &WatchdogError) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(callback));
        self
    }

    /// Tie the watchdog's lifetime to `token`. Cancelling it tears the watchdog down.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.parent_token = Some(token);
        self
    }

    /// Start the watchdog on the current tokio runtime.
    pub fn spawn(self) -> Result<WatchdogHandle> {
        let mut session = StreamSession::new(self.feed_id.clone(), self.endpoint, self.config)?;
        let initial_effects = session.begin(Instant::now().into_std());

        let token = match self.parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(session.status());

        let stale_check_interval = self.config.stale_check_interval();
        let task = WatchdogTask {
            session,
            source: self.source,
            commands: command_rx,
            event_tx,
            events: event_rx,
            status_tx,
            reconnect: None,
            load_token: None,
            token: token.clone(),
            on_exhausted: self.on_exhausted,
        };

        info!(
            feed_id = %self.feed_id,
            max_attempts = self.config.max_attempts,
            give_up_after_ms = total_backoff(self.config.base_delay(), self.config.max_attempts)
                .as_millis() as u64,
            "Starting stream watchdog"
        );
        let task = tokio::spawn(task.run(initial_effects, stale_check_interval));

        Ok(WatchdogHandle {
            feed_id: self.feed_id,
            commands: command_tx,
            status: status_rx,
            token,
            task,
        })
    }
}

/// Caller-side handle of a running watchdog.
///
/// Dropping the handle tears the watchdog down, like unmounting its panel.
#[derive(Debug)]
pub struct WatchdogHandle {
    feed_id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StreamStatus>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Latest published status.
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// URL the feed should render right now.
    pub fn current_url(&self) -> Option<String> {
        self.status.borrow().url.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn attempts(&self) -> u32 {
        self.status.borrow().attempts
    }

    /// Receiver notified on every state, attempt, URL or fault change.
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// Reset the attempt count and reconnect immediately, from any state.
    pub async fn retry(&self) -> Result<()> {
        self.commands
            .send(Command::Retry)
            .await
            .map_err(|_| WatchdogError::Stopped)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel every timer and the in-flight load, then wait for the task to exit.
    pub async fn teardown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!(feed_id = %self.feed_id, error = %e, "Watchdog task panicked");
        }
    }
}

struct WatchdogTask {
    session: StreamSession,
    source: Arc<dyn FrameSource>,
    commands: mpsc::Receiver<Command>,
    /// Cloned into every load task.
    event_tx: mpsc::Sender<WatchdogEvent>,
    events: mpsc::Receiver<WatchdogEvent>,
    status_tx: watch::Sender<StreamStatus>,
    reconnect: Option<ReconnectTimer>,
    /// Cancels the load task for the current generation.
    load_token: Option<CancellationToken>,
    token: CancellationToken,
    on_exhausted: Option<ExhaustedCallback>,
}

impl WatchdogTask {
    async fn run(mut self, initial_effects: Vec<Effect>, stale_check_interval: Duration) {
        self.apply(initial_effects);

        let mut staleness =
            tokio::time::interval_at(Instant::now() + stale_check_interval, stale_check_interval);
        staleness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reconnect_timer = Self::reconnect_timer(self.reconnect);

            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    debug!(feed_id = %self.session.feed_id(), "Watchdog cancelled");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(Command::Retry) => self.dispatch(WatchdogEvent::ManualRetry),
                    None => {
                        debug!(feed_id = %self.session.feed_id(), "Watchdog handle dropped");
                        break;
                    }
                },

                Some(event) = self.events.recv() => self.dispatch(event),

                generation = reconnect_timer => {
                    self.reconnect = None;
                    self.dispatch(WatchdogEvent::ReconnectDue { generation });
                }

                _ = staleness.tick() => self.dispatch(WatchdogEvent::StalenessTick),
            }
        }

        self.shutdown();
    }

    /// Resolves with the timer's generation once it is due; pending if none is armed.
    async fn reconnect_timer(timer: Option<ReconnectTimer>) -> u64 {
        match timer {
            Some(timer) => {
                tokio::time::sleep_until(timer.deadline).await;
                timer.generation
            }
            None => std::future::pending().await,
        }
    }

    fn dispatch(&mut self, event: WatchdogEvent) {
        let now = Instant::now().into_std();
        let effects = self.session.handle(event, now);
        self.apply(effects);
        self.publish();
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Load { url, generation } => self.start_load(url, generation),
                Effect::ScheduleReconnect { delay, generation } => {
                    // A frozen load may still hold its connection open.
                    self.cancel_load();
                    self.reconnect = Some(ReconnectTimer {
                        deadline: Instant::now() + delay,
                        generation,
                    });
                }
                Effect::CancelReconnect => self.reconnect = None,
                Effect::Exhausted { attempts } => {
                    self.cancel_load();
                    let err = WatchdogError::ExhaustedRetries { attempts };
                    error!(feed_id = %self.session.feed_id(), error = %err, "Stream unavailable");
                    if let Some(callback) = &self.on_exhausted {
                        callback(self.session.feed_id(), &err);
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let next = self.session.status();
        self.status_tx.send_if_modified(|current| {
            // Activity timestamps move with every frame; only notify on changes
            // a viewer would see.
            let changed = current.state != next.state
                || current.attempts != next.attempts
                || current.url != next.url
                || current.last_fault != next.last_fault;
            *current = next;
            changed
        });
    }

    fn start_load(&mut self, url: Url, generation: u64) {
        self.cancel_load();

        let load_token = self.token.child_token();
        self.load_token = Some(load_token.clone());

        tokio::spawn(load_stream(
            self.source.clone(),
            url,
            generation,
            self.event_tx.clone(),
            load_token,
        ));
    }

    fn cancel_load(&mut self) {
        if let Some(token) = self.load_token.take() {
            token.cancel();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_load();
        self.reconnect = None;
        self.session.close();
        info!(feed_id = %self.session.feed_id(), "Stream watchdog stopped");
    }
}

/// Open `url` and report its progress as events tagged with `generation`.
async fn load_stream(
    source: Arc<dyn FrameSource>,
    url: Url,
    generation: u64,
    events: mpsc::Sender<WatchdogEvent>,
    token: CancellationToken,
) {
    let opened = tokio::select! {
        _ = token.cancelled() => return,
        opened = source.open(&url) => opened,
    };

    let mut frames = match opened {
        Ok(frames) => frames,
        Err(e) => {
            debug!(url = %url, error = %e, "Stream load failed");
            let _ = events
                .send(WatchdogEvent::LoadFailed {
                    generation,
                    reason: e.to_string(),
                })
                .await;
            return;
        }
    };

    let mut delivered = false;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return,
            next = frames.next() => next,
        };

        let event = match next {
            Some(Ok(_)) if !delivered => {
                delivered = true;
                WatchdogEvent::LoadSucceeded { generation }
            }
            Some(Ok(_)) => WatchdogEvent::FrameReceived { generation },
            Some(Err(e)) => {
                warn!(url = %url, error = %e, "Stream interrupted");
                WatchdogEvent::LoadFailed {
                    generation,
                    reason: e.to_string(),
                }
            }
            None => WatchdogEvent::LoadFailed {
                generation,
                reason: "stream ended".to_string(),
            },
        };

        let finished = matches!(event, WatchdogEvent::LoadFailed { .. });
        if events.send(event).await.is_err() || finished {
            return;
        }
    }
}
