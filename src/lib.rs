//! # mailvault
//!
//! Scheduled, unattended backups of a filesystem path delivered as email attachments.
//!
//! ## Design Philosophy
//!
//! mailvault is designed to be:
//! - **Lossless** - Split archives concatenate back byte-for-byte with a stock shell
//! - **Tidy** - Every ephemeral file a run creates is removed, whatever the outcome
//! - **Library-first** - A Rust crate for embedding; the demo under `demos/` shows a daemon
//! - **Event-driven** - Consumers subscribe to stage and delivery events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailvault::{BackupPipeline, PipelineConfig, SmtpMailer, TaskConfig, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = SmtpMailer::new(&TransportConfig {
//!         host: "smtp.example.com".to_string(),
//!         port: 465,
//!         username: "backup@example.com".to_string(),
//!         secret: "app-password".to_string(),
//!         security: Default::default(),
//!         timeout_secs: 120,
//!     })?;
//!
//!     let task = TaskConfig {
//!         name: "documents".to_string(),
//!         source_path: "/home/me/Documents".into(),
//!         subject: "Documents backup".to_string(),
//!         recipient: None,
//!         archive_password: Some("correct horse".to_string()),
//!     };
//!
//!     let pipeline = BackupPipeline::new(PipelineConfig::default());
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = pipeline.run(&task, &transport).await;
//!     println!("success: {}", outcome.is_success());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive creation
pub mod archive;
/// Configuration types
pub mod config;
/// Batching and mail delivery
pub mod delivery;
/// Error types
pub mod error;
/// Backup pipeline and ephemeral file cleanup
pub mod pipeline;
/// Restore script generation
pub mod restore_tool;
/// Cron-based scheduling
pub mod scheduler;
/// Scheduler task execution
pub mod scheduler_task;
/// Task registry and run bookkeeping
pub mod service;
/// Archive splitting
pub mod split;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{
    Config, PipelineConfig, ScheduledTask, SchedulerConfig, SmtpSecurity, TaskConfig,
    TransportConfig,
};
#[cfg(any(test, feature = "test-util"))]
pub use delivery::RecordingTransport;
pub use delivery::{MailTransport, OutgoingMessage, SmtpMailer};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{BackupPipeline, CleanupSet, run_backup};
pub use scheduler::Scheduler;
pub use scheduler_task::SchedulerTask;
pub use service::BackupService;
pub use types::{BackupOutcome, Batch, Event, RunReport, RunStatus, Stage, TaskId, TaskStatus};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Helper function to run the backup scheduler with graceful signal handling.
///
/// Starts a [`SchedulerTask`] for `service`, waits for a termination signal, then
/// cancels the scheduler and waits for its loop to exit. Runs already in flight keep
/// going on their own tokio tasks.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use mailvault::{BackupService, Config, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load("mailvault.json".as_ref()).await?;
///     let service = Arc::new(BackupService::from_config(&config)?);
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: Arc<BackupService>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(SchedulerTask::new(service, shutdown.clone()).run());

    wait_for_signal().await;
    shutdown.cancel();

    scheduler
        .await
        .map_err(|e| Error::Unexpected(format!("scheduler task failed: {e}")))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
