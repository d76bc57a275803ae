//! Tracing subscriber setup.
//!
//! Console output is pretty or JSON; `RUST_LOG` overrides the configured level. When an error
//! log directory is configured, `ERROR` events are also appended to a daily rolling file.

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// Returns the guard of the error-file writer; keep it alive for the lifetime of the process
/// or buffered error lines are lost.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    // Client disconnects are reported by the transport at info level.
    if let Ok(directive) = "may_minihttp=warn".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    let console = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
    };

    let (error_file, guard) = match &config.error_log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating error log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.error_log_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::ERROR);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(error_file)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
