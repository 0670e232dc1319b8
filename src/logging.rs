//! Logging setup.
//!
//! Operator-facing lines go to stderr (stdout carries command results).
//! A daily rolling file under `<root>/logs/` keeps debug detail for support.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable holding the stderr filter directives.
pub const LOG_ENV: &str = "ONEKEY_LOG";

const DEFAULT_DIRECTIVE: &str = "onekey=info";
const FILE_DIRECTIVE: &str = "onekey=debug,warn";

/// Install the global subscriber.
///
/// Best-effort: if the log directory can't be created the file layer is
/// skipped. Keep the returned guard alive until exit so buffered lines are
/// flushed.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match logs_dir.and_then(file_appender) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(FILE_DIRECTIVE));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

fn file_appender(dir: &Path) -> Option<RollingFileAppender> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("warning: cannot create {}: {}", dir.display(), e);
        return None;
    }
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("onekey.log")
        .build(dir)
        .map_err(|e| eprintln!("warning: file logging disabled: {}", e))
        .ok()
}
