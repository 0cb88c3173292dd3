//! Core types for mailvault

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Unique identifier for a backup task, assigned by the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Pipeline stage of a single run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Run created, nothing touched yet
    Idle,
    /// Compressing the source path
    Archiving,
    /// Slicing the archive into parts
    Splitting,
    /// Writing restore scripts (only when there is more than one part)
    ToolBuilding,
    /// Sending batches
    Dispatching,
    /// Every batch was sent
    Succeeded,
    /// The run stopped on an error
    Failed,
}

impl Stage {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }
}

/// Event emitted during a backup run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run entered a new stage
    StageChanged {
        /// Task name
        task: String,
        /// Stage entered
        stage: Stage,
    },

    /// One batch was accepted by the mail server
    BatchSent {
        /// Task name
        task: String,
        /// 1-indexed batch position
        batch: usize,
        /// Total number of batches
        total: usize,
    },

    /// The run completed successfully
    Succeeded {
        /// Task name
        task: String,
        /// Number of archive parts produced
        parts: usize,
        /// Number of messages sent
        batches: usize,
    },

    /// The run failed
    Failed {
        /// Task name
        task: String,
        /// Failure taxonomy
        kind: ErrorKind,
        /// Human-readable diagnostic
        message: String,
    },
}

/// Summary of a successful run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Size of the archive before splitting
    pub archive_bytes: u64,
    /// Number of parts the archive was split into (1 = not split)
    pub parts: usize,
    /// Whether the restore tool bundle was attached to the first message
    ///
    /// False for single-part runs, and for multi-part runs whose parts all fit in one
    /// message (the bundle is only sent alongside two or more messages).
    pub restore_tool: bool,
    /// Number of messages sent
    pub batches: usize,
}

/// Outcome of a pipeline run as seen by the caller
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Every batch was delivered
    Succeeded(RunReport),
    /// The run stopped; diagnostics were logged
    Failed {
        /// Failure taxonomy
        kind: ErrorKind,
        /// The error text
        message: String,
    },
}

impl BackupOutcome {
    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Succeeded(_))
    }

    /// The failure kind, if the run failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            BackupOutcome::Succeeded(_) => None,
            BackupOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Coarse lifecycle status of a registered task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Never run, or idle since registration
    #[default]
    Idle,
    /// A run is in flight
    Running,
    /// The last run succeeded
    Succeeded,
    /// The last run failed
    Failed,
}

/// Last known state of a registered task
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current status
    pub status: RunStatus,
    /// When the last run finished
    pub last_run: Option<DateTime<Local>>,
    /// Failure kind of the last run, if it failed
    pub last_error: Option<ErrorKind>,
}

/// A group of files sent as the attachments of one message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    /// Attachment paths in send order
    pub files: Vec<PathBuf>,
    /// Combined size of `files` in bytes
    pub total_bytes: u64,
}

impl Batch {
    /// Number of files in the batch
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the batch holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
