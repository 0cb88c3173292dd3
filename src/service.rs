//! Backup service: task registry, schedule and run bookkeeping
//!
//! [`BackupService`] owns the registered tasks, their cron schedule and the last known
//! status of each. Runs are single-flight per task: a trigger that arrives while the
//! same task is running is rejected with [`Error::AlreadyRunning`].

use crate::config::{Config, PipelineConfig, ScheduledTask, SchedulerConfig};
use crate::delivery::{MailTransport, SmtpMailer};
use crate::error::{Error, Result};
use crate::pipeline::BackupPipeline;
use crate::scheduler::Scheduler;
use crate::types::{BackupOutcome, Event, RunStatus, TaskId, TaskStatus};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Holds registered tasks and runs them on demand
pub struct BackupService {
    /// Shared pipeline executor
    pipeline: BackupPipeline,
    /// Mail transport used by every run
    transport: Arc<dyn MailTransport>,
    /// Tick settings for the background scheduler task
    scheduler_config: SchedulerConfig,
    /// Registered tasks by id
    tasks: RwLock<HashMap<TaskId, ScheduledTask>>,
    /// Cron schedule of enabled tasks
    scheduler: Mutex<Scheduler>,
    /// Last known status per task
    statuses: Mutex<HashMap<TaskId, TaskStatus>>,
    /// Tasks with a run in flight
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
}

impl BackupService {
    /// Create a service with no tasks
    pub fn new(
        pipeline: PipelineConfig,
        scheduler_config: SchedulerConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            pipeline: BackupPipeline::new(pipeline),
            transport,
            scheduler_config,
            tasks: RwLock::new(HashMap::new()),
            scheduler: Mutex::new(Scheduler::new()),
            statuses: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Build a service from a validated configuration, delivering over SMTP
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let mailer = SmtpMailer::new(&config.smtp)?;
        Self::with_transport(config, Arc::new(mailer))
    }

    /// Build a service from a configuration with a caller-supplied transport
    pub fn with_transport(config: &Config, transport: Arc<dyn MailTransport>) -> Result<Self> {
        let service = Self::new(
            config.pipeline.clone(),
            config.scheduler.clone(),
            transport,
        );
        for task in &config.tasks {
            service.add_task(task.clone())?;
        }
        Ok(service)
    }

    /// Subscribe to pipeline events of every run
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.pipeline.subscribe()
    }

    /// Background scheduler settings
    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler_config
    }

    /// Register a new task and schedule it
    ///
    /// Returns the next fire time (None when the task is disabled).
    pub fn add_task(&self, task: ScheduledTask) -> Result<Option<DateTime<Local>>> {
        if self.read_tasks().contains_key(&task.id) {
            return Err(Error::config(
                "tasks.id",
                format!("task {} already exists", task.id),
            ));
        }
        let next_fire = self.store(task.clone())?;
        info!(task_id = task.id.0, name = %task.task.name, ?next_fire, "task added");
        Ok(next_fire)
    }

    /// Replace an existing task and reschedule it
    ///
    /// An unchanged cron expression keeps the pending fire time.
    pub fn update_task(&self, task: ScheduledTask) -> Result<Option<DateTime<Local>>> {
        if !self.read_tasks().contains_key(&task.id) {
            return Err(Error::TaskNotFound(task.id));
        }
        let next_fire = self.store(task.clone())?;
        info!(task_id = task.id.0, name = %task.task.name, ?next_fire, "task updated");
        Ok(next_fire)
    }

    /// Unregister a task
    ///
    /// A run already in flight is left to finish.
    pub fn remove_task(&self, id: TaskId) -> Result<ScheduledTask> {
        let removed = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(Error::TaskNotFound(id))?;
        self.lock_scheduler().remove(id);
        self.lock_statuses().remove(&id);
        info!(task_id = id.0, name = %removed.task.name, "task removed");
        Ok(removed)
    }

    /// All registered tasks, ordered by id
    pub fn tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.read_tasks().values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// One registered task
    pub fn task(&self, id: TaskId) -> Result<ScheduledTask> {
        self.read_tasks()
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    /// Last known status of a task
    pub fn status(&self, id: TaskId) -> Result<TaskStatus> {
        if !self.read_tasks().contains_key(&id) {
            return Err(Error::TaskNotFound(id));
        }
        Ok(self.lock_statuses().get(&id).cloned().unwrap_or_default())
    }

    /// Next scheduled fire time of a task
    pub fn next_fire(&self, id: TaskId) -> Option<DateTime<Local>> {
        self.lock_scheduler().next_fire(id)
    }

    /// Take the tasks due at `now`, advancing their schedule
    pub fn due_tasks(&self, now: DateTime<Local>) -> Vec<TaskId> {
        self.lock_scheduler().due_tasks(now)
    }

    /// Run a task immediately
    ///
    /// Fails with [`Error::TaskNotFound`] for an unknown id and [`Error::AlreadyRunning`]
    /// when the task is mid-run; otherwise runs the pipeline to completion and returns
    /// its outcome.
    pub async fn run_now(&self, id: TaskId) -> Result<BackupOutcome> {
        let scheduled = self.task(id)?;
        let _guard = match RunGuard::acquire(&self.in_flight, id) {
            Some(guard) => guard,
            None => {
                warn!(
                    task_id = id.0,
                    name = %scheduled.task.name,
                    "run skipped, task is already running"
                );
                return Err(Error::AlreadyRunning(id));
            }
        };

        self.set_status(id, |status| status.status = RunStatus::Running);
        let outcome = self
            .pipeline
            .run(&scheduled.task, self.transport.as_ref())
            .await;

        let finished = Local::now();
        self.set_status(id, |status| {
            status.last_run = Some(finished);
            match &outcome {
                BackupOutcome::Succeeded(_) => {
                    status.status = RunStatus::Succeeded;
                    status.last_error = None;
                }
                BackupOutcome::Failed { kind, .. } => {
                    status.status = RunStatus::Failed;
                    status.last_error = Some(*kind);
                }
            }
        });

        Ok(outcome)
    }

    /// Whether a run of the task is in flight
    pub fn is_running(&self, id: TaskId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    fn store(&self, task: ScheduledTask) -> Result<Option<DateTime<Local>>> {
        if task.task.name.trim().is_empty() {
            return Err(Error::config(
                "tasks.name",
                format!("task {} has an empty name", task.id),
            ));
        }
        // Schedule first so an invalid cron expression leaves the registry untouched
        let next_fire = self.lock_scheduler().upsert(&task, Local::now())?;
        let id = task.id;
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        self.lock_statuses().entry(id).or_default();
        Ok(next_fire)
    }

    /// Apply `update` to a registered task's status; removed tasks are ignored
    fn set_status(&self, id: TaskId, update: impl FnOnce(&mut TaskStatus)) {
        if !self.read_tasks().contains_key(&id) {
            return;
        }
        update(self.lock_statuses().entry(id).or_default());
    }

    fn read_tasks(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, ScheduledTask>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> std::sync::MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a task as in flight until dropped
struct RunGuard {
    in_flight: Arc<Mutex<HashSet<TaskId>>>,
    id: TaskId,
}

impl RunGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<TaskId>>>, id: TaskId) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then(|| Self {
            in_flight: Arc::clone(in_flight),
            id,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
