//! Custom assertions for pipeline integration tests

use mailvault::delivery::SentMessage;
use mailvault::restore_tool::BUNDLE_NAME;
use std::io::{Cursor, Read};
use std::path::Path;

/// Assert the ephemeral directory holds nothing (or was never created)
pub fn assert_spool_empty(spool: &Path) {
    let leftovers: Vec<_> = match std::fs::read_dir(spool) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => panic!("failed to read spool {}: {e}", spool.display()),
    };
    assert!(leftovers.is_empty(), "ephemeral files left behind: {leftovers:?}");
}

/// All attachments of all messages, in delivery order
pub fn attachments(sent: &[SentMessage]) -> Vec<(String, Vec<u8>)> {
    sent.iter()
        .flat_map(|m| m.attachments.iter().cloned())
        .collect()
}

/// Archive parts only (the restore tool bundle filtered out), in delivery order
pub fn parts(sent: &[SentMessage]) -> Vec<(String, Vec<u8>)> {
    attachments(sent)
        .into_iter()
        .filter(|(name, _)| name != BUNDLE_NAME)
        .collect()
}

/// Concatenate delivered parts the way the restore scripts do
pub fn reassemble(sent: &[SentMessage]) -> Vec<u8> {
    parts(sent).into_iter().flat_map(|(_, bytes)| bytes).collect()
}

/// Read one entry of an in-memory archive
pub fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).expect("valid zip");
    let mut entry = zip.by_name(name).expect("entry present");
    let mut out = Vec::new();
    entry.read_to_end(&mut out).expect("entry readable");
    out
}

/// Names of every entry in an in-memory archive
pub fn entry_names(archive: &[u8]) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).expect("valid zip");
    (0..zip.len())
        .map(|i| zip.by_index_raw(i).expect("entry").name().to_string())
        .collect()
}
