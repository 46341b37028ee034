//! Logging Module
//!
//! Structured logging with file output for diagnostics.

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file written next to the client
pub const LOG_FILE_NAME: &str = "client.log";

/// Initialize logging with console and file output.
///
/// Returns the path of the log file. Calling this again keeps the first
/// subscriber, so restart cycles can share one log.
pub fn init(log_dir: &Path) -> PathBuf {
    // Ensure log directory exists
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = RollingFileAppender::new(Rotation::NEVER, log_dir, LOG_FILE_NAME);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_appender);

    // Console output in debug builds only
    #[cfg(debug_assertions)]
    let console_layer = Some(fmt::layer().with_target(true).pretty());

    #[cfg(not(debug_assertions))]
    let console_layer: Option<fmt::Layer<_>> = None;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("debug,hyper=warn,reqwest=warn,rustls=warn")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("info,hyper=warn,reqwest=warn,rustls=warn")
        }
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);

    log_dir.join(LOG_FILE_NAME)
}
