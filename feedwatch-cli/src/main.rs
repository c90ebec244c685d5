mod cli;
mod config;
mod error;
mod monitor;

use std::process;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, LogFormat},
    config::AppConfig,
    error::{AppError, Result},
    monitor::{Command, FeedMonitor},
};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "feedwatch=info,feedwatch_engine=info";

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_format)?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    config.validate()?;

    if args.show_config {
        println!("{}", config.show()?);
        return Ok(());
    }

    let token = CancellationToken::new();
    let monitor = FeedMonitor::start(&config, token.clone())?;
    info!("Commands: retry <feed|all>, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupted, shutting down");
                break;
            }

            line = lines.next_line(), if stdin_open => {
                let Some(line) = stdin_line(line) else {
                    // Detached from a terminal or unreadable; keep watching until interrupted.
                    stdin_open = false;
                    continue;
                };

                match Command::parse(&line) {
                    Ok(Some(Command::Retry(target))) => match monitor.retry(&target).await {
                        Ok(count) => info!(feeds = count, "Manual retry issued"),
                        Err(e) => warn!("{}", e),
                    },
                    Ok(Some(Command::Status)) => {
                        println!("{}", monitor.backend_line());
                        for line in monitor.report() {
                            println!("{line}");
                        }
                    }
                    Ok(Some(Command::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}

/// Line to dispatch, or `None` once stdin can no longer be read.
fn stdin_line(read: std::io::Result<Option<String>>) -> Option<String> {
    match read {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Failed to read stdin, commands disabled");
            None
        }
    }
}

fn init_logging(verbose: bool, quiet: bool, format: LogFormat) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(DEFAULT_LOG_FILTER).add_directive(Level::WARN.into())
        })
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(verbose).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| AppError::Logging(e.to_string()))
}
