//! Scheduled backup example
//!
//! This example demonstrates running mailvault as a small daemon:
//! - Loading a JSON configuration (SMTP account, pipeline settings, cron tasks)
//! - Subscribing to run events
//! - Optionally firing one task immediately
//! - Running the cron scheduler until SIGINT/SIGTERM
//!
//! Usage:
//!
//! ```text
//! RUST_LOG=mailvault=debug cargo run --example scheduled_backup -- mailvault.json [task-id]
//! ```

use mailvault::{BackupService, Config, Event, TaskId, run_with_shutdown};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "mailvault.json".to_string());
    let run_now: Option<TaskId> = args.next().map(|id| id.parse()).transpose()?;

    let config = Config::load(config_path.as_ref()).await?;
    let service = Arc::new(BackupService::from_config(&config)?);

    for task in service.tasks() {
        println!(
            "task #{} {:?} cron={:?} enabled={} next={:?}",
            task.id,
            task.task.name,
            task.cron,
            task.enabled,
            service.next_fire(task.id)
        );
    }

    // Subscribe to events
    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StageChanged { task, stage } => {
                    println!("[{task}] stage: {stage:?}");
                }
                Event::BatchSent { task, batch, total } => {
                    println!("[{task}] sent message {batch}/{total}");
                }
                Event::Succeeded {
                    task,
                    parts,
                    batches,
                } => {
                    println!("[{task}] done: {parts} part(s) in {batches} message(s)");
                }
                Event::Failed {
                    task,
                    kind,
                    message,
                } => {
                    println!("[{task}] failed ({kind}): {message}");
                }
            }
        }
    });

    if let Some(id) = run_now {
        let outcome = service.run_now(id).await?;
        println!("manual run of task #{id}: {outcome:?}");
        println!("status: {:?}", service.status(id)?);
    }

    // Run the scheduler until a termination signal arrives
    run_with_shutdown(service).await?;
    Ok(())
}
