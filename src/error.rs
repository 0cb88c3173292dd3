//! Error types for mailvault
//!
//! This module provides the error handling for the backup pipeline:
//! - A single [`Error`] enum carrying contextual diagnostics (paths, batch positions,
//!   transport rejection text)
//! - An [`ErrorKind`] taxonomy that callers observe as the outcome of a failed run
//! - Stable machine-readable codes for logs and events

use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mailvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mailvault
///
/// Stage-local failures carry the path or batch position they relate to, so a single
/// log line is enough to diagnose a failed run.
#[derive(Debug, Error)]
pub enum Error {
    /// The source path of a task does not exist
    #[error("source path not found: {}", path.display())]
    SourceNotFound {
        /// The path that could not be resolved
        path: PathBuf,
    },

    /// Building the archive failed
    #[error("compression failed for {}: {reason}", archive.display())]
    CompressionFailed {
        /// The archive that was being written
        archive: PathBuf,
        /// The reason compression failed
        reason: String,
    },

    /// Splitting the archive into parts failed
    #[error("split failed for {}: {reason}", archive.display())]
    SplitFailed {
        /// The archive that was being split
        archive: PathBuf,
        /// The reason the split failed
        reason: String,
    },

    /// Writing the restore scripts or their bundle failed
    #[error("restore tool generation failed at {}: {reason}", path.display())]
    ToolGenerationFailed {
        /// The file that could not be written
        path: PathBuf,
        /// The reason generation failed
        reason: String,
    },

    /// A batch could not be delivered
    #[error("delivery of batch {batch}/{total} failed: {reason}")]
    DeliveryFailed {
        /// 1-indexed position of the failing batch
        batch: usize,
        /// Total number of batches in the run
        total: usize,
        /// Transport diagnostic (authentication, connection, or rejection text)
        reason: String,
    },

    /// The mail transport could not be set up or rejected a message
    #[error("mail transport error: {0}")]
    Transport(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// A cron expression could not be parsed
    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule {
        /// The rejected expression
        expression: String,
        /// Parser diagnostic
        reason: String,
    },

    /// No task is registered under this id
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// A run for this task is already in flight
    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else raised during a run (panics, join failures)
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

/// Outcome taxonomy observed by callers of a pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The source path did not resolve
    SourceNotFound,
    /// The archiver reported a disqualifying error or produced no output
    CompressionFailed,
    /// The splitter hit an I/O failure
    SplitFailed,
    /// Restore scripts or their bundle could not be written
    ToolGenerationFailed,
    /// A batch could not be sent
    DeliveryFailed,
    /// Catch-all for anything else
    UnexpectedFailure,
}

impl ErrorKind {
    /// Machine-readable code, stable across releases
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceNotFound => "source_not_found",
            ErrorKind::CompressionFailed => "compression_failed",
            ErrorKind::SplitFailed => "split_failed",
            ErrorKind::ToolGenerationFailed => "tool_generation_failed",
            ErrorKind::DeliveryFailed => "delivery_failed",
            ErrorKind::UnexpectedFailure => "unexpected_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Map this error onto the run outcome taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            Error::CompressionFailed { .. } => ErrorKind::CompressionFailed,
            Error::SplitFailed { .. } => ErrorKind::SplitFailed,
            Error::ToolGenerationFailed { .. } => ErrorKind::ToolGenerationFailed,
            Error::DeliveryFailed { .. } | Error::Transport(_) => ErrorKind::DeliveryFailed,
            Error::Config { .. }
            | Error::InvalidSchedule { .. }
            | Error::TaskNotFound(_)
            | Error::AlreadyRunning(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Unexpected(_) => ErrorKind::UnexpectedFailure,
        }
    }

    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
