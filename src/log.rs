//! Structured logging for the render engine.
//!
//! Log levels:
//! - ERROR: Renderer launch failures, unrecoverable startup problems
//! - WARN: Telemetry unavailable, skipped recovery candidates, non-zero renderer exits
//! - INFO: Startup, submissions, dispatch and completion of renders
//! - DEBUG: Scheduler decisions, progress updates, config loading
//! - TRACE: Raw renderer output chunks
//!
//! Debug mode can be enabled with `--debug` flag or `STYLIZE_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when it is set.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const LOG_FILE_NAME: &str = "stylize.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn debug_from_env() -> bool {
    std::env::var("STYLIZE_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Default filter directive for the given debug mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "stylize=debug"
    } else {
        "stylize=info"
    }
}

/// Initialize logging to stderr and ~/.stylize/stylize.log
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || debug_from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = Config::stylize_dir()
        .ok()
        .and_then(|dir| file_writer(&dir))
        .map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
        });

    // Already initialized (tests, repeated calls) is not an error.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

fn file_writer(dir: &Path) -> Option<tracing_appender::non_blocking::NonBlocking> {
    std::fs::create_dir_all(dir).ok()?;
    // Truncate on startup, one log per run.
    std::fs::write(dir.join(LOG_FILE_NAME), "").ok()?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    LOG_GUARD.set(guard).ok()?;
    Some(writer)
}
