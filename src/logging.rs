//! Tracing setup for the worker processes.
//!
//! Two outputs: a compact stdout layer for the container log collector and
//! a daily-rotated file under the log directory for post-mortems. Level
//! filtering comes from `RUST_LOG` (default: "info").

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber for a worker process.
///
/// # Panics
/// Panics if a subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to create EnvFilter");

    let file_appender = tracing_appender::rolling::daily(log_path, "crawldex.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.clone());

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the process for the non-blocking writer to
    // keep flushing; leak it.
    Box::leak(Box::new(file_guard));

    tracing::debug!("logs: {}/crawldex.log", log_path.display());

    Ok(())
}
