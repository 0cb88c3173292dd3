//! End-to-end pipeline scenarios against a recording transport
//!
//! Sizes are scaled from MiB to KiB: a 45 KiB ceiling plays the role of the 45 MiB
//! attachment limit.

mod common;

use common::*;
use mailvault::restore_tool::{BUNDLE_NAME, RESTORED_NAME, UNIX_SCRIPT, WINDOWS_SCRIPT};
use mailvault::{BackupOutcome, BackupPipeline, ErrorKind, Event, RecordingTransport, Stage};
use tempfile::TempDir;

const CEILING: u64 = 45 * KIB;

#[tokio::test]
async fn small_source_is_one_message_without_index() {
    let temp = TempDir::new().unwrap();
    let source = source_tree(temp.path(), "photos", 10 * KIB as usize);
    let spool = temp.path().join("spool");
    let transport = RecordingTransport::new("backup@example.com");

    let outcome = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING))
        .run(&task("photos", &source), &transport)
        .await;

    let report = match outcome {
        BackupOutcome::Succeeded(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.parts, 1);
    assert_eq!(report.batches, 1);
    assert!(!report.restore_tool);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("photos backup - "));
    assert!(!sent[0].subject.contains('['));
    assert_eq!(sent[0].attachments.len(), 1);
    assert!(!sent[0].body.contains(BUNDLE_NAME));

    let archive = &sent[0].attachments[0].1;
    let names = entry_names(archive);
    assert!(names.contains(&"photos/big.bin".to_string()), "{names:?}");
    assert!(names.iter().all(|n| !n.contains(".git")), "{names:?}");
    assert_eq!(
        read_entry(archive, "photos/reports/2024/q1.bin"),
        std::fs::read(source.join("reports/2024/q1.bin")).unwrap()
    );
    assert_spool_empty(&spool);
}

#[tokio::test]
async fn large_source_splits_into_three_parts_with_tool_first() {
    let temp = TempDir::new().unwrap();
    let source = source_tree(temp.path(), "archive", 120 * KIB as usize);
    let spool = temp.path().join("spool");
    let transport = RecordingTransport::new("backup@example.com");

    let outcome = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING))
        .run(&task("archive", &source), &transport)
        .await;

    let report = match outcome {
        BackupOutcome::Succeeded(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.parts, 3);
    assert!(report.restore_tool);

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    for (i, message) in sent.iter().enumerate() {
        assert!(
            message.subject.starts_with(&format!("archive backup [{}/3] - ", i + 1)),
            "{}",
            message.subject
        );
    }

    // Tool bundle leads batch 1 and only batch 1 explains the restore
    assert_eq!(sent[0].attachments[0].0, BUNDLE_NAME);
    assert!(sent[0].body.contains(BUNDLE_NAME));
    assert!(sent[1..].iter().all(|m| !m.body.contains(BUNDLE_NAME)));

    let parts = parts(&sent);
    let sizes: Vec<u64> = parts.iter().map(|(_, b)| b.len() as u64).collect();
    assert_eq!(sizes[0], CEILING);
    assert_eq!(sizes[1], CEILING);
    assert!(sizes[2] > 0 && sizes[2] <= CEILING, "{sizes:?}");
    let names: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names[0].ends_with(".zip.001"), "{names:?}");
    assert!(names[1].ends_with(".zip.002"), "{names:?}");
    assert!(names[2].ends_with(".zip.003"), "{names:?}");

    let restored = reassemble(&sent);
    assert_eq!(restored.len() as u64, report.archive_bytes);
    assert_eq!(
        read_entry(&restored, "archive/big.bin"),
        std::fs::read(source.join("big.bin")).unwrap()
    );

    // The bundle holds both scripts, each naming the parts in order
    let bundle = &sent[0].attachments[0].1;
    let mut scripts = entry_names(bundle);
    scripts.sort();
    assert_eq!(scripts, vec![UNIX_SCRIPT.to_string(), WINDOWS_SCRIPT.to_string()]);
    let windows = String::from_utf8(read_entry(bundle, WINDOWS_SCRIPT)).unwrap();
    assert!(windows.contains(&format!(
        "\"{}\" + \"{}\" + \"{}\"",
        names[0], names[1], names[2]
    )));

    assert_spool_empty(&spool);
}

#[cfg(unix)]
#[tokio::test]
async fn unix_restore_script_rebuilds_the_archive() {
    let temp = TempDir::new().unwrap();
    let source = source_tree(temp.path(), "site", 100 * KIB as usize);
    let spool = temp.path().join("spool");
    let transport = RecordingTransport::new("backup@example.com");

    let outcome = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING))
        .run(&task("site", &source), &transport)
        .await;
    assert!(outcome.is_success(), "{outcome:?}");

    // Recipient side: drop every attachment into one folder, unpack the tool, run it
    let inbox = temp.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    let sent = transport.sent();
    for (name, bytes) in attachments(&sent) {
        std::fs::write(inbox.join(&name), &bytes).unwrap();
    }
    let bundle = std::fs::read(inbox.join(BUNDLE_NAME)).unwrap();
    std::fs::write(inbox.join(UNIX_SCRIPT), read_entry(&bundle, UNIX_SCRIPT)).unwrap();

    let status = std::process::Command::new("sh")
        .arg(inbox.join(UNIX_SCRIPT))
        .current_dir(temp.path())
        .status()
        .unwrap();
    assert!(status.success());

    let rebuilt = std::fs::read(inbox.join(RESTORED_NAME)).unwrap();
    assert_eq!(rebuilt, reassemble(&sent));
    assert_eq!(
        read_entry(&rebuilt, "site/reports/notes.bin"),
        std::fs::read(source.join("reports/notes.bin")).unwrap()
    );
}

#[tokio::test]
async fn missing_source_fails_before_creating_files() {
    let temp = TempDir::new().unwrap();
    let spool = temp.path().join("spool");
    let transport = RecordingTransport::new("backup@example.com");

    let outcome = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING))
        .run(&task("ghost", &temp.path().join("does-not-exist")), &transport)
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::SourceNotFound));
    assert_eq!(transport.attempts(), 0);
    assert!(!spool.exists());
}

#[tokio::test]
async fn rejection_on_batch_two_of_three_is_delivery_failed() {
    let temp = TempDir::new().unwrap();
    let source = source_tree(temp.path(), "archive", 120 * KIB as usize);
    let spool = temp.path().join("spool");
    let pipeline = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING));
    let mut events = pipeline.subscribe();
    let transport = RecordingTransport::new("backup@example.com").failing_on(2);

    let outcome = pipeline.run(&task("archive", &source), &transport).await;

    match &outcome {
        BackupOutcome::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::DeliveryFailed);
            assert!(message.contains("batch 2/3"), "{message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Batch 1 already went out and is not rolled back
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("[1/3]"));
    assert_eq!(transport.attempts(), 2);
    assert_spool_empty(&spool);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let batches_sent = seen
        .iter()
        .filter(|e| matches!(e, Event::BatchSent { .. }))
        .count();
    assert_eq!(batches_sent, 1);
    assert!(seen.iter().any(|e| matches!(
        e,
        Event::StageChanged {
            stage: Stage::Failed,
            ..
        }
    )));
}

#[tokio::test]
async fn transport_panic_is_unexpected_failure_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    let source = source_tree(temp.path(), "archive", 120 * KIB as usize);
    let spool = temp.path().join("spool");
    let transport = RecordingTransport::new("backup@example.com").panicking_on(3);

    let outcome = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING))
        .run(&task("archive", &source), &transport)
        .await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::UnexpectedFailure));
    assert_eq!(transport.sent().len(), 2);
    assert_spool_empty(&spool);
}

#[tokio::test]
async fn concurrent_tasks_do_not_share_ephemeral_files() {
    let temp = TempDir::new().unwrap();
    let first = source_tree(temp.path(), "alpha", 100 * KIB as usize);
    let second = source_tree(temp.path(), "beta", 100 * KIB as usize);
    let spool = temp.path().join("spool");
    let pipeline = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING));
    let alpha_transport = RecordingTransport::new("backup@example.com");
    let beta_transport = RecordingTransport::new("backup@example.com");
    let alpha_task = task("alpha", &first);
    let beta_task = task("beta", &second);

    let (alpha, beta) = tokio::join!(
        pipeline.run(&alpha_task, &alpha_transport),
        pipeline.run(&beta_task, &beta_transport),
    );

    assert!(alpha.is_success(), "{alpha:?}");
    assert!(beta.is_success(), "{beta:?}");
    assert_eq!(
        read_entry(&reassemble(&alpha_transport.sent()), "alpha/big.bin"),
        std::fs::read(first.join("big.bin")).unwrap()
    );
    assert_eq!(
        read_entry(&reassemble(&beta_transport.sent()), "beta/big.bin"),
        std::fs::read(second.join("big.bin")).unwrap()
    );
    assert_spool_empty(&spool);
}

#[tokio::test]
async fn tasks_whose_names_sanitize_alike_keep_their_own_backups() {
    let temp = TempDir::new().unwrap();
    let first = source_tree(temp.path(), "alpha", 100 * KIB as usize);
    let second = source_tree(temp.path(), "beta", 100 * KIB as usize);
    let spool = temp.path().join("spool");
    let pipeline = BackupPipeline::new(pipeline_config(&spool, CEILING, CEILING));
    let alpha_transport = RecordingTransport::new("backup@example.com");
    let beta_transport = RecordingTransport::new("backup@example.com");
    // Neither name has a filename-safe character, so both reduce to the same stem
    let alpha_task = task("备份文档", &first);
    let beta_task = task("备份照片", &second);

    let (alpha, beta) = tokio::join!(
        pipeline.run(&alpha_task, &alpha_transport),
        pipeline.run(&beta_task, &beta_transport),
    );

    assert!(alpha.is_success(), "{alpha:?}");
    assert!(beta.is_success(), "{beta:?}");
    let alpha_archive = reassemble(&alpha_transport.sent());
    let beta_archive = reassemble(&beta_transport.sent());
    assert!(entry_names(&alpha_archive).iter().all(|n| n.starts_with("alpha/")));
    assert!(entry_names(&beta_archive).iter().all(|n| n.starts_with("beta/")));
    assert_eq!(
        read_entry(&alpha_archive, "alpha/big.bin"),
        std::fs::read(first.join("big.bin")).unwrap()
    );
    assert_eq!(
        read_entry(&beta_archive, "beta/big.bin"),
        std::fs::read(second.join("big.bin")).unwrap()
    );
    assert_spool_empty(&spool);
}
