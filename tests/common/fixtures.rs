//! Source trees and configuration fixtures

use mailvault::{PipelineConfig, TaskConfig};
use std::path::{Path, PathBuf};

/// One KiB, the unit the scaled-down scenarios are expressed in
pub const KIB: u64 = 1024;

/// Deterministic bytes that deflate cannot shrink
///
/// Keeps archive size close to source size so part counts are predictable.
pub fn incompressible(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u8
        })
        .collect()
}

/// Build `<root>/<name>` holding `total` bytes of payload spread over a few files,
/// plus transient junk that must never be archived
pub fn source_tree(root: &Path, name: &str, total: usize) -> PathBuf {
    let source = root.join(name);
    std::fs::create_dir_all(source.join("reports/2024")).expect("create source");
    std::fs::create_dir_all(source.join(".git")).expect("create .git");

    let first = total / 2;
    let second = total / 4;
    let third = total - first - second;
    std::fs::write(source.join("big.bin"), incompressible(first, 1)).expect("write big.bin");
    std::fs::write(source.join("reports/2024/q1.bin"), incompressible(second, 2))
        .expect("write q1.bin");
    std::fs::write(source.join("reports/notes.bin"), incompressible(third, 3))
        .expect("write notes.bin");
    std::fs::write(source.join(".git/HEAD"), b"ref: refs/heads/main").expect("write HEAD");
    source
}

/// Task backing up `source`
pub fn task(name: &str, source: &Path) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        source_path: source.to_path_buf(),
        subject: format!("{name} backup"),
        recipient: None,
        archive_password: None,
    }
}

/// Pipeline writing to `spool` with the given part size and batch ceiling
pub fn pipeline_config(spool: &Path, chunk_size: u64, max_batch_bytes: u64) -> PipelineConfig {
    PipelineConfig {
        temp_dir: spool.to_path_buf(),
        chunk_size,
        max_batch_bytes,
        ..PipelineConfig::default()
    }
}
