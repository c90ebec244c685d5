//! # feedwatch-engine
//!
//! Keeps live camera feeds connected. Each feed runs a [`Watchdog`] that
//! loads the backend's continuously-updating image stream, reconnects with
//! exponential backoff when a load fails or the stream freezes, and stops
//! after a fixed number of attempts until a manual retry.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use feedwatch_engine::{HttpConfig, HttpFrameSource, StreamEndpoint, Watchdog, WatchdogConfig};
//!
//! # async fn run() -> feedwatch_engine::Result<()> {
//! let endpoint = StreamEndpoint::new("http://127.0.0.1:5000")?;
//! let source = Arc::new(HttpFrameSource::new(&HttpConfig::default())?);
//!
//! let handle = Watchdog::builder("feed_1", endpoint, source)
//!     .config(WatchdogConfig::default())
//!     .on_exhausted(|feed_id, err| eprintln!("{feed_id}: {err}"))
//!     .spawn()?;
//!
//! println!("{} {:?}", handle.status().connectivity, handle.current_url());
//! handle.teardown().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod feeds;
pub mod http;
pub mod session;
pub mod source;
pub mod watchdog;

pub use config::{HttpConfig, WatchdogConfig};
pub use endpoint::StreamEndpoint;
pub use error::{Result, WatchdogError};
pub use feeds::{AlertLevel, FeedBoard, FeedData, FeedStatusPoller, FeedsClient};
pub use session::{
    ConnectionState, Connectivity, Effect, StreamSession, StreamStatus, WatchdogEvent,
};
pub use source::{FrameSource, FrameStream, HttpFrameSource};
pub use watchdog::{Watchdog, WatchdogBuilder, WatchdogHandle};
