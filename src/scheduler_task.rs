//! Scheduler task execution for cron-triggered backups
//!
//! This module provides the background task that wakes up on a fixed tick, asks the
//! [`BackupService`] which tasks are due, and starts a run for each of them.
//!
//! # Features
//!
//! - Configurable tick (`scheduler.tick_secs`)
//! - Each due task runs on its own tokio task, so a slow backup never delays others
//! - Missed fires coalesce into one run
//! - Graceful shutdown through a `CancellationToken`
//!
//! # Example
//!
//! ```no_run
//! use mailvault::{BackupService, Config};
//! use mailvault::scheduler_task::SchedulerTask;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("mailvault.json".as_ref()).await?;
//! let service = Arc::new(BackupService::from_config(&config)?);
//! let shutdown = CancellationToken::new();
//!
//! let task = SchedulerTask::new(service, shutdown.clone());
//! let handle = tokio::spawn(task.run());
//!
//! shutdown.cancel();
//! handle.await?;
//! # Ok(())
//! # }
//! ```

use crate::error::Error;
use crate::service::BackupService;
use crate::types::{BackupOutcome, TaskId};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task that fires due backups
pub struct SchedulerTask {
    /// Service holding the schedule and running the pipeline
    service: Arc<BackupService>,

    /// Time between due checks
    tick: Duration,

    /// Stops the loop when cancelled
    shutdown: CancellationToken,
}

impl SchedulerTask {
    /// Creates a new scheduler task
    ///
    /// The tick comes from the service's scheduler settings.
    pub fn new(service: Arc<BackupService>, shutdown: CancellationToken) -> Self {
        let tick = service.scheduler_config().tick();
        Self {
            service,
            tick,
            shutdown,
        }
    }

    /// Override the tick interval
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Starts the scheduler task
    ///
    /// Checks for due tasks once per tick until the shutdown token is cancelled. Runs
    /// already started are not interrupted by shutdown.
    pub async fn run(self) {
        info!(tick_secs = self.tick.as_secs(), "scheduler task started");

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.fire_due(Local::now());
                }
            }
        }

        info!("scheduler task stopped");
    }

    /// Start a run for every task due at `now`
    fn fire_due(&self, now: DateTime<Local>) -> Vec<JoinHandle<()>> {
        let due = self.service.due_tasks(now);
        if due.is_empty() {
            debug!("no tasks due");
            return Vec::new();
        }

        info!(count = due.len(), "firing due tasks");
        due.into_iter()
            .map(|id| {
                let service = Arc::clone(&self.service);
                tokio::spawn(run_scheduled(service, id))
            })
            .collect()
    }
}

async fn run_scheduled(service: Arc<BackupService>, id: TaskId) {
    match service.run_now(id).await {
        Ok(BackupOutcome::Succeeded(report)) => {
            debug!(task_id = id.0, batches = report.batches, "scheduled run finished");
        }
        Ok(BackupOutcome::Failed { kind, .. }) => {
            debug!(task_id = id.0, %kind, "scheduled run failed");
        }
        Err(Error::AlreadyRunning(_)) => {
            // Logged by the service
        }
        Err(e) => {
            warn!(task_id = id.0, error = %e, "scheduled run could not start");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ScheduledTask, SchedulerConfig, TaskConfig};
    use crate::delivery::RecordingTransport;
    use crate::types::RunStatus;
    use chrono::Duration as ChronoDuration;

    fn create_test_service(
        temp: &tempfile::TempDir,
        transport: Arc<RecordingTransport>,
    ) -> Arc<BackupService> {
        let source = temp.path().join("data");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("file.txt"), b"scheduled").unwrap();

        let service = BackupService::new(
            PipelineConfig {
                temp_dir: temp.path().join("spool"),
                ..PipelineConfig::default()
            },
            SchedulerConfig::default(),
            transport,
        );
        service
            .add_task(ScheduledTask {
                id: TaskId(1),
                cron: "* * * * *".into(),
                enabled: true,
                task: TaskConfig {
                    name: "every-minute".into(),
                    source_path: source,
                    subject: "Minutely".into(),
                    recipient: None,
                    archive_password: None,
                },
            })
            .unwrap();
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_scheduler_task_shutdown_on_signal() {
        let temp = tempfile::TempDir::new().unwrap();
        let service = create_test_service(&temp, Arc::new(RecordingTransport::new("me@x.org")));
        let shutdown = CancellationToken::new();

        let task = SchedulerTask::new(service, shutdown.clone());
        let handle = tokio::spawn(task.run());

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(
            result.is_ok(),
            "Scheduler task should exit on shutdown signal"
        );
    }

    #[tokio::test]
    async fn test_fire_due_runs_due_tasks() {
        let temp = tempfile::TempDir::new().unwrap();
        let transport = Arc::new(RecordingTransport::new("me@x.org"));
        let service = create_test_service(&temp, transport.clone());
        let task = SchedulerTask::new(service.clone(), CancellationToken::new());

        let handles = task.fire_due(Local::now() + ChronoDuration::minutes(2));
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(
            service.status(TaskId(1)).unwrap().status,
            RunStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_with_tick_overrides_config() {
        let temp = tempfile::TempDir::new().unwrap();
        let service = create_test_service(&temp, Arc::new(RecordingTransport::new("me@x.org")));

        let task = SchedulerTask::new(service, CancellationToken::new());
        assert_eq!(task.tick, Duration::from_secs(30));

        let task = task.with_tick(Duration::from_millis(50));
        assert_eq!(task.tick, Duration::from_millis(50));
    }
}
