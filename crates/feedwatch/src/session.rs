//! Stream session state machine.
//!
//! A [`StreamSession`] keeps one feed's render URL pointed at a live endpoint.
//! It never touches timers or the network itself: every input is a
//! [`WatchdogEvent`] fed to [`StreamSession::handle`], and every side effect
//! comes back as an [`Effect`] for the driver to carry out. This keeps the
//! machine testable without a runtime.
//!
//! # Transitions
//!
//! | From | Event | To |
//! |------|-------|----|
//! | `Connecting` | load succeeded | `Live` |
//! | `Connecting`, `Live` | load failed | `Reconnecting` (or `Failed` once attempts are exhausted) |
//! | `Live` | staleness tick past the timeout | `Reconnecting` |
//! | `Reconnecting` | reconnect due | `Connecting` |
//! | any | manual retry | `Connecting` |
//!
//! Events tagged with an older load generation are ignored.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::delay_for_attempt;
use crate::config::WatchdogConfig;
use crate::endpoint::{StreamEndpoint, cache_token};
use crate::error::{Result, WatchdogError};

/// Connection state of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// A load is in flight for the current URL.
    Connecting,
    /// Frames are arriving.
    Live,
    /// Waiting for the backoff delay before the next attempt.
    Reconnecting,
    /// Retries exhausted; only a manual retry leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Live => "LIVE",
            Self::Reconnecting => "RECONNECTING",
            Self::Failed => "FAILED",
        }
    }

    pub fn connectivity(&self) -> Connectivity {
        match self {
            Self::Live => Connectivity::Live,
            Self::Connecting | Self::Reconnecting | Self::Failed => Connectivity::Offline,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Connectivity flag shown next to a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connectivity {
    Live,
    Offline,
}

impl Connectivity {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.pad("LIVE"),
            Self::Offline => f.pad("OFFLINE"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// The load for `generation` delivered its first frame.
    LoadSucceeded { generation: u64 },
    /// A later frame arrived on the load for `generation`.
    FrameReceived { generation: u64 },
    /// The load for `generation` failed or its stream ended.
    LoadFailed { generation: u64, reason: String },
    /// Periodic staleness check.
    StalenessTick,
    /// The backoff timer scheduled for `generation` fired.
    ReconnectDue { generation: u64 },
    /// User asked to try again.
    ManualRetry,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start loading `url`; replaces any load in flight.
    Load { url: Url, generation: u64 },
    /// Arm the reconnect timer; replaces any pending one.
    ScheduleReconnect { delay: Duration, generation: u64 },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Automatic retries stopped.
    Exhausted { attempts: u32 },
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub feed_id: String,
    pub state: ConnectionState,
    pub connectivity: Connectivity,
    /// URL the feed should currently render.
    pub url: Option<String>,
    pub attempts: u32,
    pub consecutive_failures: u32,
    pub max_attempts: u32,
    #[serde(skip)]
    pub last_activity: Option<Instant>,
    pub last_fault: Option<String>,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        self.connectivity.is_live()
    }

    /// Short label for a feed tile.
    pub fn label(&self) -> String {
        match self.state {
            ConnectionState::Live => "LIVE".to_string(),
            ConnectionState::Connecting if self.attempts == 0 => "Loading stream...".to_string(),
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                format!("Reconnecting... ({}/{})", self.attempts, self.max_attempts)
            }
            ConnectionState::Failed => {
                format!("Stream Unavailable: failed after {} attempts", self.attempts)
            }
        }
    }
}

/// One feed's reconnect state.
#[derive(Debug)]
pub struct StreamSession {
    feed_id: String,
    endpoint: StreamEndpoint,
    config: WatchdogConfig,
    state: ConnectionState,
    url: Option<Url>,
    /// Reconnect attempts made since the last successful load.
    attempts: u32,
    consecutive_failures: u32,
    last_activity: Option<Instant>,
    /// When the current load was issued.
    connecting_since: Option<Instant>,
    last_fault: Option<String>,
    /// Identifies the current load; bumped on every (re)connect.
    generation: u64,
    closed: bool,
}

impl StreamSession {
    pub fn new(
        feed_id: impl Into<String>,
        endpoint: StreamEndpoint,
        config: WatchdogConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            feed_id: feed_id.into(),
            endpoint,
            config,
            state: ConnectionState::Connecting,
            url: None,
            attempts: 0,
            consecutive_failures: 0,
            last_activity: None,
            connecting_since: None,
            last_fault: None,
            generation: 0,
            closed: false,
        })
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connectivity(&self) -> Connectivity {
        self.state.connectivity()
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            feed_id: self.feed_id.clone(),
            state: self.state,
            connectivity: self.connectivity(),
            url: self.url.as_ref().map(Url::to_string),
            attempts: self.attempts,
            consecutive_failures: self.consecutive_failures,
            max_attempts: self.config.max_attempts,
            last_activity: self.last_activity,
            last_fault: self.last_fault.clone(),
        }
    }

    /// Issue the first load when the feed is mounted.
    pub fn begin(&mut self, now: Instant) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        self.connect(now)
    }

    /// Tear the session down. Every later event is ignored.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(feed_id = %self.feed_id, state = %self.state, "Closing stream session");
            self.closed = true;
        }
    }

    /// Apply one event and return the effects the driver must perform.
    pub fn handle(&mut self, event: WatchdogEvent, now: Instant) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }

        match event {
            WatchdogEvent::LoadSucceeded { generation } => {
                if !self.is_current(generation) {
                    return Vec::new();
                }
                self.on_load_succeeded(now)
            }
            WatchdogEvent::FrameReceived { generation } => {
                if self.is_current(generation) && self.state == ConnectionState::Live {
                    self.last_activity = Some(now);
                }
                Vec::new()
            }
            WatchdogEvent::LoadFailed { generation, reason } => {
                if !self.is_current(generation) {
                    return Vec::new();
                }
                match self.state {
                    ConnectionState::Connecting | ConnectionState::Live => {
                        self.on_fault(WatchdogError::Load { reason })
                    }
                    // A reconnect is already pending or retries are over.
                    ConnectionState::Reconnecting | ConnectionState::Failed => Vec::new(),
                }
            }
            WatchdogEvent::StalenessTick => self.on_staleness_tick(now),
            WatchdogEvent::ReconnectDue { generation } => {
                if generation != self.generation || self.state != ConnectionState::Reconnecting {
                    return Vec::new();
                }
                self.attempts += 1;
                self.connect(now)
            }
            WatchdogEvent::ManualRetry => {
                info!(feed_id = %self.feed_id, state = %self.state, "Manual retry");
                self.attempts = 0;
                self.consecutive_failures = 0;
                let mut effects = vec![Effect::CancelReconnect];
                effects.extend(self.connect(now));
                effects
            }
        }
    }

    /// Load events only count while their load is the one in flight.
    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
            && matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Live
            )
    }

    fn on_load_succeeded(&mut self, now: Instant) -> Vec<Effect> {
        self.last_activity = Some(now);
        if self.state == ConnectionState::Live {
            return Vec::new();
        }

        info!(
            feed_id = %self.feed_id,
            attempts = self.attempts,
            "Video stream connected"
        );
        self.state = ConnectionState::Live;
        self.attempts = 0;
        self.consecutive_failures = 0;
        self.last_fault = None;
        vec![Effect::CancelReconnect]
    }

    fn on_staleness_tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.state {
            ConnectionState::Live => self.check_frozen(now),
            ConnectionState::Connecting => self.check_first_frame(now),
            ConnectionState::Reconnecting | ConnectionState::Failed => Vec::new(),
        }
    }

    fn check_frozen(&mut self, now: Instant) -> Vec<Effect> {
        let Some(last_activity) = self.last_activity else {
            return Vec::new();
        };

        let idle = now.saturating_duration_since(last_activity);
        if idle <= self.config.stale_timeout() {
            return Vec::new();
        }

        warn!(
            feed_id = %self.feed_id,
            idle_ms = idle.as_millis() as u64,
            "Stream appears frozen, reconnecting"
        );
        self.on_fault(WatchdogError::Stale { idle })
    }

    /// A load that connects but never delivers a frame counts as a failed load.
    fn check_first_frame(&mut self, now: Instant) -> Vec<Effect> {
        let Some(since) = self.connecting_since else {
            return Vec::new();
        };

        let waited = now.saturating_duration_since(since);
        if waited <= self.config.stale_timeout() {
            return Vec::new();
        }

        self.on_fault(WatchdogError::load(format!(
            "no frame received within {}ms",
            waited.as_millis()
        )))
    }

    /// Load and staleness faults share one path: back off, or give up once
    /// the attempts are spent or the fault can never clear on its own.
    fn on_fault(&mut self, fault: WatchdogError) -> Vec<Effect> {
        self.consecutive_failures += 1;
        self.last_fault = Some(fault.to_string());

        if !fault.is_retryable() || self.attempts >= self.config.max_attempts {
            warn!(
                feed_id = %self.feed_id,
                attempts = self.attempts,
                error = %fault,
                "Giving up on stream"
            );
            self.state = ConnectionState::Failed;
            return vec![
                Effect::CancelReconnect,
                Effect::Exhausted {
                    attempts: self.attempts,
                },
            ];
        }

        let delay = delay_for_attempt(self.config.base_delay(), self.attempts);
        warn!(
            feed_id = %self.feed_id,
            attempt = self.attempts + 1,
            max = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %fault,
            "Reconnecting stream"
        );
        self.state = ConnectionState::Reconnecting;
        vec![Effect::ScheduleReconnect {
            delay,
            generation: self.generation,
        }]
    }

    /// Enter `Connecting` with a freshly cache-busted URL.
    fn connect(&mut self, now: Instant) -> Vec<Effect> {
        self.generation += 1;
        self.connecting_since = Some(now);
        let token = cache_token(self.generation);
        let url = match self.endpoint.stream_url(&self.feed_id, &token) {
            Ok(url) => url,
            Err(e) => {
                // Only reachable with a feed id the URL parser refuses; no
                // load can ever succeed, so surface it as a load fault.
                self.state = ConnectionState::Connecting;
                return self.on_fault(e);
            }
        };

        debug!(
            feed_id = %self.feed_id,
            generation = self.generation,
            url = %url,
            "Connecting stream"
        );
        self.state = ConnectionState::Connecting;
        self.url = Some(url.clone());
        vec![Effect::Load {
            url,
            generation: self.generation,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StreamSession {
        let endpoint = StreamEndpoint::new("http://127.0.0.1:5000").unwrap();
        StreamSession::new("feed_1", endpoint, WatchdogConfig::default()).unwrap()
    }

    fn fail(session: &mut StreamSession, now: Instant) -> Vec<Effect> {
        let generation = session.generation();
        session.handle(
            WatchdogEvent::LoadFailed {
                generation,
                reason: "connection refused".to_string(),
            },
            now,
        )
    }

    fn reconnect_due(session: &mut StreamSession, now: Instant) -> Vec<Effect> {
        let generation = session.generation();
        session.handle(WatchdogEvent::ReconnectDue { generation }, now)
    }

    fn succeed(session: &mut StreamSession, now: Instant) -> Vec<Effect> {
        let generation = session.generation();
        session.handle(WatchdogEvent::LoadSucceeded { generation }, now)
    }

    fn scheduled_delay(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|effect| match effect {
            Effect::ScheduleReconnect { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    fn loaded_url(effects: &[Effect]) -> Option<Url> {
        effects.iter().find_map(|effect| match effect {
            Effect::Load { url, .. } => Some(url.clone()),
            _ => None,
        })
    }

    #[test]
    fn begin_issues_cache_busted_load() {
        let mut s = session();
        let effects = s.begin(Instant::now());

        let url = loaded_url(&effects).unwrap();
        assert_eq!(url.path(), "/api/video/stream/feed_1");
        assert!(url.query().unwrap().starts_with("t="));
        assert_eq!(s.state(), ConnectionState::Connecting);
        assert_eq!(s.connectivity(), Connectivity::Offline);
        assert_eq!(s.url(), Some(&url));
    }

    #[test]
    fn success_goes_live_and_resets_counters() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());

        let effects = succeed(&mut s, now);
        assert_eq!(effects, vec![Effect::CancelReconnect]);
        assert_eq!(s.state(), ConnectionState::Live);
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.last_activity(), Some(now));
        assert!(s.status().is_connected());
    }

    #[test]
    fn backoff_doubles_until_failed_on_sixth_failure() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());

        let expected = [2, 4, 8, 16, 32];
        for (attempt, secs) in expected.iter().enumerate() {
            let effects = fail(&mut s, now);
            assert_eq!(s.state(), ConnectionState::Reconnecting);
            assert_eq!(
                scheduled_delay(&effects),
                Some(Duration::from_secs(*secs)),
                "attempt {attempt}"
            );

            let effects = reconnect_due(&mut s, now);
            assert_eq!(s.state(), ConnectionState::Connecting);
            assert!(loaded_url(&effects).is_some());
            assert_eq!(s.attempts(), attempt as u32 + 1);
        }

        let effects = fail(&mut s, now);
        assert_eq!(s.state(), ConnectionState::Failed);
        assert_eq!(scheduled_delay(&effects), None);
        assert!(effects.contains(&Effect::Exhausted { attempts: 5 }));
        assert_eq!(s.consecutive_failures(), 6);
        assert_eq!(s.connectivity(), Connectivity::Offline);
    }

    #[test]
    fn failed_session_ignores_further_events() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        for _ in 0..5 {
            fail(&mut s, now);
            reconnect_due(&mut s, now);
        }
        fail(&mut s, now);
        assert_eq!(s.state(), ConnectionState::Failed);

        assert!(reconnect_due(&mut s, now).is_empty());
        assert!(succeed(&mut s, now).is_empty());
        assert!(s.handle(WatchdogEvent::StalenessTick, now).is_empty());
        assert_eq!(s.state(), ConnectionState::Failed);
    }

    #[test]
    fn manual_retry_from_failed_restarts_at_zero() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        for _ in 0..5 {
            fail(&mut s, now);
            reconnect_due(&mut s, now);
        }
        fail(&mut s, now);
        let before = s.url().cloned();

        let effects = s.handle(WatchdogEvent::ManualRetry, now);
        assert_eq!(effects[0], Effect::CancelReconnect);
        let url = loaded_url(&effects).unwrap();
        assert_ne!(Some(url), before);
        assert_eq!(s.state(), ConnectionState::Connecting);
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.consecutive_failures(), 0);
    }

    #[test]
    fn manual_retry_while_reconnecting_cancels_pending_timer() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        fail(&mut s, now);
        let stale_generation = s.generation();

        let effects = s.handle(WatchdogEvent::ManualRetry, now);
        assert_eq!(effects[0], Effect::CancelReconnect);
        assert_eq!(s.state(), ConnectionState::Connecting);

        // The timer armed before the retry no longer applies.
        let effects = s.handle(
            WatchdogEvent::ReconnectDue {
                generation: stale_generation,
            },
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(s.attempts(), 0);
    }

    #[test]
    fn example_three_failures_then_success() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());

        let mut delays = Vec::new();
        for _ in 0..3 {
            delays.push(scheduled_delay(&fail(&mut s, now)).unwrap());
            reconnect_due(&mut s, now);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(s.attempts(), 3);

        succeed(&mut s, now);
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.state(), ConnectionState::Live);

        // Counting starts over after a success.
        assert_eq!(
            scheduled_delay(&fail(&mut s, now)),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn superseded_success_is_ignored() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        let first = s.generation();
        s.handle(WatchdogEvent::ManualRetry, now);

        let effects = s.handle(WatchdogEvent::LoadSucceeded { generation: first }, now);
        assert!(effects.is_empty());
        assert_eq!(s.state(), ConnectionState::Connecting);

        let effects = s.handle(
            WatchdogEvent::LoadFailed {
                generation: first,
                reason: "late".to_string(),
            },
            now,
        );
        assert!(effects.is_empty());
        assert_eq!(s.state(), ConnectionState::Connecting);
    }

    #[test]
    fn staleness_triggers_single_reconnect() {
        let start = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        succeed(&mut s, start);

        assert!(
            s.handle(WatchdogEvent::StalenessTick, start + Duration::from_secs(10))
                .is_empty()
        );

        let late = start + Duration::from_secs(11);
        let effects = s.handle(WatchdogEvent::StalenessTick, late);
        assert_eq!(scheduled_delay(&effects), Some(Duration::from_secs(2)));
        assert_eq!(s.state(), ConnectionState::Reconnecting);

        // Further ticks before the reconnect resolves do nothing.
        for extra in 1..5 {
            let effects = s.handle(
                WatchdogEvent::StalenessTick,
                late + Duration::from_secs(extra),
            );
            assert!(effects.is_empty());
        }
        assert_eq!(s.state(), ConnectionState::Reconnecting);
        assert!(s.status().last_fault.unwrap().contains("stale"));
    }

    #[test]
    fn connecting_without_a_frame_times_out() {
        let start = Instant::now();
        let mut s = session();
        s.begin(start);

        assert!(
            s.handle(WatchdogEvent::StalenessTick, start + Duration::from_secs(10))
                .is_empty()
        );
        assert_eq!(s.state(), ConnectionState::Connecting);

        let effects = s.handle(WatchdogEvent::StalenessTick, start + Duration::from_secs(11));
        assert_eq!(scheduled_delay(&effects), Some(Duration::from_secs(2)));
        assert_eq!(s.state(), ConnectionState::Reconnecting);
        assert_eq!(s.consecutive_failures(), 1);
        assert!(s.status().last_fault.unwrap().contains("no frame received"));

        // The deadline restarts with every new load.
        let later = start + Duration::from_secs(13);
        reconnect_due(&mut s, later);
        assert!(
            s.handle(WatchdogEvent::StalenessTick, later + Duration::from_secs(9))
                .is_empty()
        );
        assert_eq!(s.state(), ConnectionState::Connecting);
    }

    #[test]
    fn unrecoverable_fault_fails_immediately() {
        let mut s = session();
        s.begin(Instant::now());

        let effects = s.on_fault(WatchdogError::invalid_endpoint("feed_1", "not a base URL"));
        assert_eq!(scheduled_delay(&effects), None);
        assert!(effects.contains(&Effect::Exhausted { attempts: 0 }));
        assert_eq!(s.state(), ConnectionState::Failed);
    }

    #[test]
    fn frames_keep_stream_fresh() {
        let start = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        succeed(&mut s, start);

        let generation = s.generation();
        for secs in [6, 12, 18] {
            s.handle(
                WatchdogEvent::FrameReceived { generation },
                start + Duration::from_secs(secs),
            );
        }
        let effects = s.handle(WatchdogEvent::StalenessTick, start + Duration::from_secs(25));
        assert!(effects.is_empty());
        assert_eq!(s.state(), ConnectionState::Live);
    }

    #[test]
    fn closed_session_is_inert() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        s.close();

        assert!(fail(&mut s, now).is_empty());
        assert!(s.handle(WatchdogEvent::ManualRetry, now).is_empty());
        assert!(s.begin(Instant::now()).is_empty());
        assert_eq!(s.state(), ConnectionState::Connecting);
        assert!(s.is_closed());
    }

    #[test]
    fn status_labels_follow_state() {
        let now = Instant::now();
        let mut s = session();
        s.begin(Instant::now());
        assert_eq!(s.status().label(), "Loading stream...");

        fail(&mut s, now);
        reconnect_due(&mut s, now);
        assert_eq!(s.status().label(), "Reconnecting... (1/5)");

        succeed(&mut s, now);
        assert_eq!(s.status().label(), "LIVE");
    }

    #[test]
    fn zero_max_attempts_fails_on_first_error() {
        let endpoint = StreamEndpoint::new("http://127.0.0.1:5000").unwrap();
        let config = WatchdogConfig {
            max_attempts: 0,
            ..WatchdogConfig::default()
        };
        let mut s = StreamSession::new("feed_1", endpoint, config).unwrap();
        s.begin(Instant::now());

        let effects = fail(&mut s, Instant::now());
        assert!(effects.contains(&Effect::Exhausted { attempts: 0 }));
        assert_eq!(s.state(), ConnectionState::Failed);
    }
}
