//! Onekey - bootstrapper and launcher for the xiaozhi server bundle.
//!
//! This library provides the core functionality for the `onekey` CLI tool:
//! reconciling the server config file, bootstrapping the bundled database,
//! checking for bundle updates, and launching the bundled components.

pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod config;
pub mod gate;
pub mod launcher;
pub mod logging;
pub mod markers;
pub mod reconcile;
pub mod services;
pub mod sys;
pub mod update;
pub mod worker;

use std::path::PathBuf;
use std::time::Duration;

pub use reconcile::writer::{RestoreStatus, WriteFailure};


/// Library-level error type for Onekey operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Required file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}{}: {message}", .path.display(), fmt_location(.line, .column))]
    Parse {
        path: PathBuf,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    #[error(transparent)]
    Write(#[from] WriteFailure),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("No valid input after {0} attempts")]
    AttemptsExhausted(u32),

    #[error("Timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { what: String, waited: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must stop the overall bootstrap flow.
    ///
    /// Non-fatal errors (`Cancelled`, `Timeout`, a write failure whose
    /// original content was restored) leave the bundle consistent, so the
    /// operator may continue or retry.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Parse { .. } | Error::NotFound(_) | Error::AttemptsExhausted(_) => true,
            Error::Write(failure) => !failure.restore.original_intact(),
            Error::Cancelled(_) | Error::Timeout { .. } | Error::Interrupted => false,
            _ => true,
        }
    }

    /// Whether the operator declined or aborted, as opposed to a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled(_) | Error::Interrupted)
    }
}

fn fmt_location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" (line {}, column {})", line, column),
        (Some(line), None) => format!(" (line {})", line),
        _ => String::new(),
    }
}

/// Result type alias for Onekey operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_includes_location() {
        let err = Error::Parse {
            path: PathBuf::from("data/.config.yaml"),
            message: "did not find expected key".to_string(),
            line: Some(4),
            column: Some(3),
        };
        let display = err.to_string();
        assert!(display.contains("data/.config.yaml"));
        assert!(display.contains("line 4, column 3"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cancellation_is_not_fatal() {
        let err = Error::Cancelled("operator declined upgrade".to_string());
        assert!(!err.is_fatal());
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            what: "mysqld".to_string(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Timed out after 30s waiting for mysqld");
        assert!(!err.is_fatal());
    }
}
