use super::*;
use crate::config::TaskConfig;
use chrono::TimeZone;

fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, day, hour, min, 0).unwrap()
}

fn scheduled(id: i64, cron: &str) -> ScheduledTask {
    ScheduledTask {
        id: TaskId(id),
        cron: cron.into(),
        enabled: true,
        task: TaskConfig {
            name: format!("task-{id}"),
            source_path: "/srv/data".into(),
            subject: "Backup".into(),
            recipient: None,
            archive_password: None,
        },
    }
}

#[test]
fn test_parse_cron_accepts_five_and_six_fields() {
    assert!(parse_cron("0 4 * * *").is_ok());
    assert!(parse_cron("30 0 4 * * *").is_ok());
    assert!(parse_cron("*/15 * * * 1-5").is_ok());
}

#[test]
fn test_parse_cron_rejects_garbage() {
    for bad in ["", "every day", "61 * * * *", "* * *"] {
        match parse_cron(bad) {
            Err(Error::InvalidSchedule { expression, .. }) => assert_eq!(expression, bad),
            other => panic!("{bad:?} parsed as {:?}", other.is_ok()),
        }
    }
}

#[test]
fn test_upsert_computes_next_fire() {
    let mut scheduler = Scheduler::new();
    let next = scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    assert_eq!(next, Some(at(11, 4, 0)));
    assert_eq!(scheduler.next_fire(TaskId(1)), Some(at(11, 4, 0)));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_upsert_same_expression_keeps_pending_fire() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    // Later upsert with the same cron (e.g. subject edited) must not push the fire back
    let mut edited = scheduled(1, "0 4 * * *");
    edited.task.subject = "Renamed".into();
    let next = scheduler.upsert(&edited, at(11, 3, 59)).unwrap();

    assert_eq!(next, Some(at(11, 4, 0)));
}

#[test]
fn test_upsert_new_expression_reschedules() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    let next = scheduler
        .upsert(&scheduled(1, "0 18 * * *"), at(10, 12, 0))
        .unwrap();

    assert_eq!(next, Some(at(10, 18, 0)));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_upsert_disabled_task_unschedules() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    let mut disabled = scheduled(1, "0 4 * * *");
    disabled.enabled = false;
    assert_eq!(scheduler.upsert(&disabled, at(10, 12, 0)).unwrap(), None);
    assert!(!scheduler.contains(TaskId(1)));
    assert!(scheduler.is_empty());
}

#[test]
fn test_upsert_invalid_cron_leaves_existing_entry() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    assert!(
        scheduler
            .upsert(&scheduled(1, "not cron"), at(10, 12, 0))
            .is_err()
    );
    assert_eq!(scheduler.next_fire(TaskId(1)), Some(at(11, 4, 0)));
}

#[test]
fn test_remove() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    assert!(scheduler.remove(TaskId(1)));
    assert!(!scheduler.remove(TaskId(1)));
    assert_eq!(scheduler.next_fire(TaskId(1)), None);
}

#[test]
fn test_due_tasks_nothing_due_before_fire_time() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    assert!(scheduler.due_tasks(at(11, 3, 59)).is_empty());
    assert_eq!(scheduler.next_fire(TaskId(1)), Some(at(11, 4, 0)));
}

#[test]
fn test_due_tasks_fires_once_and_advances() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 4 * * *"), at(10, 12, 0))
        .unwrap();

    assert_eq!(scheduler.due_tasks(at(11, 4, 0)), vec![TaskId(1)]);
    assert!(scheduler.due_tasks(at(11, 4, 0)).is_empty());
    assert_eq!(scheduler.next_fire(TaskId(1)), Some(at(12, 4, 0)));
}

#[test]
fn test_due_tasks_coalesces_missed_fires() {
    let mut scheduler = Scheduler::new();
    scheduler
        .upsert(&scheduled(1, "0 * * * *"), at(10, 12, 0))
        .unwrap();

    // Five hourly occurrences missed: one fire, next is the upcoming hour
    assert_eq!(scheduler.due_tasks(at(10, 17, 30)), vec![TaskId(1)]);
    assert_eq!(scheduler.next_fire(TaskId(1)), Some(at(10, 18, 0)));
}

#[test]
fn test_due_tasks_ordered_by_fire_time() {
    let mut scheduler = Scheduler::new();
    let now = at(10, 12, 0);
    scheduler.upsert(&scheduled(1, "0 14 * * *"), now).unwrap();
    scheduler.upsert(&scheduled(2, "0 13 * * *"), now).unwrap();
    scheduler.upsert(&scheduled(3, "30 13 * * *"), now).unwrap();
    scheduler.upsert(&scheduled(4, "0 20 * * *"), now).unwrap();

    assert_eq!(
        scheduler.due_tasks(at(10, 15, 0)),
        vec![TaskId(2), TaskId(3), TaskId(1)]
    );
}
