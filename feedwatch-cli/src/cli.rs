use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

/// Keep event-safety camera feeds connected and report their status.
///
/// While running, type `retry <feed|all>`, `status` or `quit` on stdin.
#[derive(Debug, Parser)]
#[command(name = "feedwatch", version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Backend base URL serving /api/feeds and /api/video/stream/<feed>
    #[arg(long, env = "FEEDWATCH_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Feed to watch (repeatable). Defaults to the configured feed list
    #[arg(short, long = "feed", value_name = "FEED_ID")]
    pub feeds: Vec<String>,

    /// Reconnect ceiling before a feed is reported unavailable
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Backoff unit in milliseconds
    #[arg(long)]
    pub base_delay_ms: Option<u64>,

    /// Inactivity threshold in milliseconds
    #[arg(long)]
    pub stale_timeout_ms: Option<u64>,

    /// Do not poll /api/feeds for crowd figures
    #[arg(long)]
    pub no_feed_status: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
