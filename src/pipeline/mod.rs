//! Backup pipeline for a single task run
//!
//! A run moves through these stages, strictly in sequence:
//! 1. Archive - Compress the source path into one ZIP on ephemeral storage
//! 2. Split - Slice the archive into fixed-size parts (skipped when it fits)
//! 3. Tool - Write restore scripts and bundle them (only for more than one part)
//! 4. Dispatch - Batch parts under the size ceiling and mail one message per batch
//!
//! Every file a stage creates is registered in a [`CleanupSet`] and purged before
//! [`BackupPipeline::run`] returns, whatever the outcome. A panic anywhere in the run
//! is caught and reported as `UnexpectedFailure`.
//!
//! A run claims its archive name by creating the file exclusively, appending `_2`,
//! `_3`, ... when the name is taken. Parts and the restore directory derive from the
//! claimed name and are themselves created exclusively, so runs whose task names
//! sanitize to the same stem never touch each other's files.

mod cleanup;

pub use cleanup::CleanupSet;

use crate::archive::Archiver;
use crate::config::{PipelineConfig, TaskConfig, TransportConfig};
use crate::delivery::{Dispatcher, MailTransport, SmtpMailer, plan_batches};
use crate::error::{Error, Result};
use crate::restore_tool::RestoreToolBuilder;
use crate::split::Splitter;
use crate::types::{BackupOutcome, Event, RunReport, Stage};
use crate::utils::{run_stamp, sanitize_file_stem};
use chrono::{DateTime, Local};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Capacity of the event channel created by [`BackupPipeline::new`]
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Suffixed archive names tried before a run gives up claiming one
const MAX_NAME_ATTEMPTS: usize = 100;

/// Pipeline executor shared by every task run
#[derive(Clone)]
pub struct BackupPipeline {
    /// Ephemeral storage, part size and batch ceiling
    config: Arc<PipelineConfig>,
    /// Event channel for stage and delivery events
    event_tx: broadcast::Sender<Event>,
    /// Source of the timestamp in ephemeral filenames
    clock: fn() -> DateTime<Local>,
}

impl BackupPipeline {
    /// Create a pipeline with its own event channel
    pub fn new(config: PipelineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::with_event_sender(Arc::new(config), event_tx)
    }

    /// Create a pipeline publishing on an existing event channel
    pub fn with_event_sender(
        config: Arc<PipelineConfig>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            event_tx,
            clock: Local::now,
        }
    }

    /// Pin the timestamp used in ephemeral filenames
    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Pipeline settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one backup of `task`, delivering through `transport`
    ///
    /// Never returns an error: every failure, panics included, becomes
    /// [`BackupOutcome::Failed`] with its [`crate::ErrorKind`] after ephemeral files
    /// have been purged.
    pub async fn run(&self, task: &TaskConfig, transport: &dyn MailTransport) -> BackupOutcome {
        let cleanup = CleanupSet::new();
        info!(
            task = %task.name,
            source = ?task.source_path,
            transport = transport.name(),
            "starting backup run"
        );

        let result = AssertUnwindSafe(self.execute(task, transport, &cleanup))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Unexpected(panic_message(panic.as_ref()))));

        cleanup.purge(&task.name).await;

        match result {
            Ok(report) => {
                self.emit_stage(task, Stage::Succeeded);
                self.event_tx
                    .send(Event::Succeeded {
                        task: task.name.clone(),
                        parts: report.parts,
                        batches: report.batches,
                    })
                    .ok();
                info!(
                    task = %task.name,
                    archive_bytes = report.archive_bytes,
                    parts = report.parts,
                    batches = report.batches,
                    "backup run succeeded"
                );
                BackupOutcome::Succeeded(report)
            }
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                self.emit_stage(task, Stage::Failed);
                self.event_tx
                    .send(Event::Failed {
                        task: task.name.clone(),
                        kind,
                        message: message.clone(),
                    })
                    .ok();
                error!(
                    task = %task.name,
                    kind = %kind,
                    error = %message,
                    "backup run failed"
                );
                BackupOutcome::Failed { kind, message }
            }
        }
    }

    async fn execute(
        &self,
        task: &TaskConfig,
        transport: &dyn MailTransport,
        cleanup: &CleanupSet,
    ) -> Result<RunReport> {
        // Nothing may be created for a source that does not exist
        check_source(&task.source_path).await?;

        self.emit_stage(task, Stage::Archiving);
        let base = format!(
            "{}{}_{}",
            self.config.archive_prefix,
            sanitize_file_stem(&task.name),
            run_stamp((self.clock)())
        );
        let (stem, archive_path) = claim_archive(&self.config.temp_dir, &base, cleanup).await?;

        let summary = Archiver::new(self.config.extra_exclusions.clone())
            .archive(&task.source_path, task.effective_password(), &archive_path)
            .await?;

        self.emit_stage(task, Stage::Splitting);
        let parts = Splitter::new(self.config.chunk_size)
            .split(&summary.path, cleanup)
            .await?;

        let tool = if parts.len() > 1 {
            self.emit_stage(task, Stage::ToolBuilding);
            let names: Vec<String> = parts.iter().map(|p| file_name(p)).collect();
            let out_dir = self.config.temp_dir.join(format!("{stem}_restore"));
            Some(RestoreToolBuilder.build(&names, &out_dir, cleanup).await?)
        } else {
            None
        };

        self.emit_stage(task, Stage::Dispatching);
        let batches = plan_batches(
            &parts,
            self.config.max_batch_bytes,
            tool.as_ref().map(|t| t.bundle.as_path()),
            self.config.reserve_tool_bundle_space,
        )
        .await?;
        let sent = Dispatcher::new(transport)
            .with_events(&self.event_tx)
            .dispatch(task, &batches)
            .await?;

        // A multi-part run whose parts all fit in one message ships without the bundle
        let tool_delivered = tool.as_ref().is_some_and(|t| {
            batches
                .first()
                .is_some_and(|b| b.files.first() == Some(&t.bundle))
        });

        Ok(RunReport {
            archive_bytes: summary.bytes,
            parts: parts.len(),
            restore_tool: tool_delivered,
            batches: sent,
        })
    }

    fn emit_stage(&self, task: &TaskConfig, stage: Stage) {
        info!(task = %task.name, ?stage, "stage changed");
        self.event_tx
            .send(Event::StageChanged {
                task: task.name.clone(),
                stage,
            })
            .ok();
    }
}

/// Run one backup over SMTP with the given settings
///
/// Convenience for one-off runs; long-lived callers should hold a
/// [`crate::BackupService`] instead. A transport that cannot even be configured fails
/// the run as `DeliveryFailed` without touching the source.
pub async fn run_backup(
    task: &TaskConfig,
    transport: &TransportConfig,
    config: PipelineConfig,
) -> BackupOutcome {
    let mailer = match SmtpMailer::new(transport) {
        Ok(mailer) => mailer,
        Err(e) => {
            error!(task = %task.name, error = %e, "failed to configure mail transport");
            return BackupOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            };
        }
    };
    BackupPipeline::new(config).run(task, &mailer).await
}

async fn check_source(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::SourceNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Create `<dir>/<base>.zip` exclusively, falling back to `<base>_2.zip`, `<base>_3.zip`, ...
///
/// Returns the claimed stem and archive path. The archive is registered for cleanup as
/// soon as it exists and is purged last, so the name stays claimed until every file
/// derived from it is gone.
async fn claim_archive(
    dir: &Path,
    base: &str,
    cleanup: &CleanupSet,
) -> Result<(String, PathBuf)> {
    let first = dir.join(format!("{base}.zip"));
    tokio::fs::create_dir_all(dir).await.map_err(|e| Error::CompressionFailed {
        archive: first.clone(),
        reason: format!("failed to create {}: {e}", dir.display()),
    })?;

    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let stem = if attempt == 1 {
            base.to_string()
        } else {
            format!("{base}_{attempt}")
        };
        let path = dir.join(format!("{stem}.zip"));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {
                cleanup.register(&path);
                return Ok((stem, path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(Error::CompressionFailed {
                    archive: path,
                    reason: format!("failed to create archive: {e}"),
                });
            }
        }
    }

    Err(Error::CompressionFailed {
        archive: first,
        reason: format!("no free archive name after {MAX_NAME_ATTEMPTS} attempts"),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("run panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("run panicked: {s}")
    } else {
        "run panicked".into()
    }
}
