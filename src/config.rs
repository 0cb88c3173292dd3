//! Configuration types for mailvault

use crate::error::{Error, Result};
use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Default part size and batch ceiling, sized under common provider attachment limits
pub const DEFAULT_CHUNK_SIZE: u64 = 45 * MIB;

/// Pipeline behavior (ephemeral storage, part size, batch ceiling)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ephemeral directory for archives, parts and restore tools
    /// (default: "<system temp>/mailvault")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum size of a single archive part in bytes (default: 45 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum combined attachment size of one message in bytes (default: 45 MiB)
    ///
    /// A single file larger than this still goes out as a one-file batch.
    #[serde(default = "default_chunk_size")]
    pub max_batch_bytes: u64,

    /// Count the restore tool bundle against the first batch's budget (default: false)
    ///
    /// When false the bundle is prepended to batch 1 after partitioning, so batch 1 may
    /// exceed `max_batch_bytes` by the bundle size.
    #[serde(default)]
    pub reserve_tool_bundle_space: bool,

    /// Prefix for archive filenames (default: "backup_")
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    /// Extra exclusion globs, relative to the source directory (e.g. "**/*.log")
    ///
    /// These are applied in addition to the built-in transient-path list.
    #[serde(default)]
    pub extra_exclusions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            chunk_size: default_chunk_size(),
            max_batch_bytes: default_chunk_size(),
            reserve_tool_bundle_space: false,
            archive_prefix: default_archive_prefix(),
            extra_exclusions: Vec::new(),
        }
    }
}

/// How the SMTP session is encrypted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// TLS from the first byte (SMTPS, usually port 465)
    #[default]
    ImplicitTls,
    /// Plain connection upgraded with STARTTLS (usually port 587)
    StartTls,
}

/// Mail submission credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Mail server hostname
    pub host: String,

    /// Mail server port (default: 465)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Authenticated username, also used as the sender address
    pub username: String,

    /// Password or app token for `username`
    pub secret: String,

    /// Session encryption (default: implicit TLS)
    #[serde(default)]
    pub security: SmtpSecurity,

    /// Per-command network timeout in seconds (default: 120)
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

impl TransportConfig {
    /// Network timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("security", &self.security)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// What to back up and where to send it
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskConfig {
    /// Task name, shown in logs and message bodies
    pub name: String,

    /// Directory (or single file) to archive
    pub source_path: PathBuf,

    /// Subject line prefix for every message of a run
    pub subject: String,

    /// Recipient address (None or empty = send to the authenticated sender)
    #[serde(default)]
    pub recipient: Option<String>,

    /// Archive password (None, empty or whitespace-only = no encryption)
    #[serde(default)]
    pub archive_password: Option<String>,
}

impl TaskConfig {
    /// The password to encrypt with, if one was effectively set
    pub fn effective_password(&self) -> Option<&str> {
        self.archive_password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// The recipient to use when it differs from the sender
    pub fn effective_recipient(&self) -> Option<&str> {
        self.recipient
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

impl std::fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskConfig")
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("subject", &self.subject)
            .field("recipient", &self.recipient)
            .field(
                "archive_password",
                &self.effective_password().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A task registered with the scheduler
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTask {
    /// Caller-assigned identity
    pub id: TaskId,

    /// Crontab expression, e.g. "0 4 * * *" (a leading seconds field is also accepted)
    pub cron: String,

    /// Whether the scheduler should fire this task (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// What the task backs up
    #[serde(flatten)]
    pub task: TaskConfig,
}

/// Background scheduler settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often due tasks are checked, in seconds (default: 30)
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a Duration
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

/// Main configuration for mailvault
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// SMTP submission settings
    pub smtp: TransportConfig,

    /// Archive, split and batch settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Scheduler tick settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Registered backup tasks
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl Config {
    /// Parse a JSON configuration document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw)
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.smtp.host.trim().is_empty() {
            return Err(Error::config("smtp.host", "must not be empty"));
        }
        if self.smtp.port == 0 {
            return Err(Error::config("smtp.port", "must not be 0"));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(Error::config("pipeline.chunk_size", "must be greater than 0"));
        }
        if self.pipeline.max_batch_bytes == 0 {
            return Err(Error::config(
                "pipeline.max_batch_bytes",
                "must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for scheduled in &self.tasks {
            if !seen.insert(scheduled.id) {
                return Err(Error::config(
                    "tasks.id",
                    format!("duplicate task id {}", scheduled.id),
                ));
            }
            if scheduled.task.name.trim().is_empty() {
                return Err(Error::config(
                    "tasks.name",
                    format!("task {} has an empty name", scheduled.id),
                ));
            }
            crate::scheduler::parse_cron(&scheduled.cron)?;
        }
        Ok(())
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("mailvault")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_archive_prefix() -> String {
    "backup_".into()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_timeout_secs() -> u64 {
    120
}

fn default_tick_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "smtp": {
            "host": "smtp.example.com",
            "username": "backup@example.com",
            "secret": "hunter2"
        }
    }"#;

    fn task(password: Option<&str>, recipient: Option<&str>) -> TaskConfig {
        TaskConfig {
            name: "docs".into(),
            source_path: "/srv/docs".into(),
            subject: "Docs backup".into(),
            recipient: recipient.map(Into::into),
            archive_password: password.map(Into::into),
        }
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.security, SmtpSecurity::ImplicitTls);
        assert_eq!(config.pipeline.chunk_size, 45 * MIB);
        assert_eq!(config.pipeline.max_batch_bytes, 45 * MIB);
        assert!(!config.pipeline.reserve_tool_bundle_space);
        assert_eq!(config.pipeline.archive_prefix, "backup_");
        assert_eq!(config.scheduler.tick_secs, 30);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn scheduled_task_flattens_task_fields() {
        let json = r#"{
            "smtp": {"host": "smtp.example.com", "username": "u", "secret": "s"},
            "tasks": [{
                "id": 7,
                "cron": "0 4 * * *",
                "name": "photos",
                "source_path": "/srv/photos",
                "subject": "Photos",
                "archive_password": "pw"
            }]
        }"#;
        let config = Config::from_json_str(json).unwrap();
        let scheduled = &config.tasks[0];
        assert_eq!(scheduled.id, TaskId(7));
        assert!(scheduled.enabled);
        assert_eq!(scheduled.task.name, "photos");
        assert_eq!(scheduled.task.effective_password(), Some("pw"));
        assert_eq!(scheduled.task.recipient, None);
    }

    #[test]
    fn whitespace_password_means_no_encryption() {
        assert_eq!(task(Some("   "), None).effective_password(), None);
        assert_eq!(task(Some(""), None).effective_password(), None);
        assert_eq!(task(None, None).effective_password(), None);
        assert_eq!(task(Some(" pw "), None).effective_password(), Some("pw"));
    }

    #[test]
    fn empty_recipient_falls_back_to_none() {
        assert_eq!(task(None, Some("")).effective_recipient(), None);
        assert_eq!(
            task(None, Some("ops@example.com")).effective_recipient(),
            Some("ops@example.com")
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = Config::from_json_str(MINIMAL).unwrap();
        let rendered = format!("{:?}", config.smtp);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));

        let rendered = format!("{:?}", task(Some("topsecret"), None));
        assert!(!rendered.contains("topsecret"));
    }

    #[test]
    fn validate_rejects_zero_chunk_size() {
        let mut config = Config::from_json_str(MINIMAL).unwrap();
        config.pipeline.chunk_size = 0;
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("pipeline.chunk_size")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_host() {
        let mut config = Config::from_json_str(MINIMAL).unwrap();
        config.smtp.host = "  ".into();
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_task_ids() {
        let mut config = Config::from_json_str(MINIMAL).unwrap();
        let scheduled = ScheduledTask {
            id: TaskId(1),
            cron: "0 4 * * *".into(),
            enabled: true,
            task: task(None, None),
        };
        config.tasks = vec![scheduled.clone(), scheduled];
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn validate_rejects_bad_cron() {
        let mut config = Config::from_json_str(MINIMAL).unwrap();
        config.tasks = vec![ScheduledTask {
            id: TaskId(1),
            cron: "every tuesday".into(),
            enabled: true,
            task: task(None, None),
        }];
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn load_reads_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mailvault.json");
        tokio::fs::write(&path, MINIMAL).await.unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.smtp.host, "smtp.example.com");
    }
}
