//! Cron-based scheduler for backup tasks.
//!
//! The scheduler keeps one entry per task: the parsed cron expression and the next time
//! the task should fire. Tasks are added, changed and removed one at a time; nothing is
//! ever rebuilt wholesale.
//!
//! # Example
//!
//! ```rust
//! use mailvault::config::{ScheduledTask, TaskConfig};
//! use mailvault::scheduler::Scheduler;
//! use mailvault::TaskId;
//! use chrono::{Local, TimeZone};
//!
//! let task = ScheduledTask {
//!     id: TaskId::new(1),
//!     cron: "0 4 * * *".into(),
//!     enabled: true,
//!     task: TaskConfig {
//!         name: "docs".into(),
//!         source_path: "/srv/docs".into(),
//!         subject: "Docs backup".into(),
//!         recipient: None,
//!         archive_password: None,
//!     },
//! };
//!
//! let mut scheduler = Scheduler::new();
//! let now = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
//! let next = scheduler.upsert(&task, now).unwrap().unwrap();
//! assert_eq!(next, Local.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap());
//! ```

use crate::config::ScheduledTask;
use crate::error::{Error, Result};
use crate::types::TaskId;
use chrono::{DateTime, Local};
use croner::Cron;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Parse a crontab expression
///
/// Accepts the classic 5-field form (`min hour dom month dow`) and an optional
/// leading seconds field.
pub fn parse_cron(expression: &str) -> Result<Cron> {
    Cron::new(expression.trim())
        .with_seconds_optional()
        .parse()
        .map_err(|e| Error::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

/// Schedule state of one task
struct Entry {
    cron: Cron,
    expression: String,
    next_fire: Option<DateTime<Local>>,
}

/// Scheduler mapping task ids to their next fire time
#[derive(Default)]
pub struct Scheduler {
    entries: HashMap<TaskId, Entry>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update the schedule of a task
    ///
    /// A disabled task is removed. An enabled task whose expression did not change keeps
    /// its pending fire time; otherwise the next fire is computed from `now`. Returns the
    /// next fire time, or `None` if the task is not scheduled.
    pub fn upsert(
        &mut self,
        task: &ScheduledTask,
        now: DateTime<Local>,
    ) -> Result<Option<DateTime<Local>>> {
        if !task.enabled {
            self.remove(task.id);
            return Ok(None);
        }

        if let Some(entry) = self.entries.get(&task.id)
            && entry.expression == task.cron
        {
            return Ok(entry.next_fire);
        }

        let cron = parse_cron(&task.cron)?;
        let next_fire = next_after(&cron, now);
        debug!(task_id = task.id.0, cron = %task.cron, ?next_fire, "task scheduled");

        self.entries.insert(
            task.id,
            Entry {
                cron,
                expression: task.cron.clone(),
                next_fire,
            },
        );
        Ok(next_fire)
    }

    /// Stop scheduling a task
    ///
    /// Returns true if the task was scheduled.
    pub fn remove(&mut self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Next fire time of a task
    pub fn next_fire(&self, id: TaskId) -> Option<DateTime<Local>> {
        self.entries.get(&id).and_then(|e| e.next_fire)
    }

    /// Whether a task is scheduled
    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of scheduled tasks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is scheduled
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tasks whose fire time is at or before `now`, earliest first
    ///
    /// Each returned task is advanced to its first occurrence strictly after `now`, so
    /// several missed occurrences coalesce into a single fire.
    pub fn due_tasks(&mut self, now: DateTime<Local>) -> Vec<TaskId> {
        let mut due: Vec<(DateTime<Local>, TaskId)> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.next_fire {
                Some(at) if at <= now => Some((at, *id)),
                _ => None,
            })
            .collect();
        due.sort();

        for (_, id) in &due {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.next_fire = next_after(&entry.cron, now);
            }
        }

        due.into_iter().map(|(_, id)| id).collect()
    }
}

fn next_after(cron: &Cron, now: DateTime<Local>) -> Option<DateTime<Local>> {
    match cron.find_next_occurrence(&now, false) {
        Ok(next) => Some(next),
        Err(e) => {
            warn!(error = %e, "cron expression has no upcoming occurrence");
            None
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
