//! Grouping files into transport-sized batches
//!
//! Greedy forward fill: files keep their order and are never split; a file that alone
//! exceeds the ceiling becomes a one-file batch rather than an error.

use crate::error::Result;
use crate::types::Batch;
use std::path::{Path, PathBuf};

/// Partition sized files into ordered batches under `ceiling`
///
/// `first_batch_reserved` bytes are counted against batch 1's budget before any file is
/// placed, which leaves room for an attachment that is added afterwards.
pub fn partition(files: &[(PathBuf, u64)], ceiling: u64, first_batch_reserved: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::default();
    let mut reserved = first_batch_reserved;

    for (path, size) in files {
        let would_be = reserved
            .saturating_add(current.total_bytes)
            .saturating_add(*size);
        if !current.is_empty() && would_be > ceiling {
            batches.push(std::mem::take(&mut current));
            reserved = 0;
        }
        current.files.push(path.clone());
        current.total_bytes += size;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Put the restore tool bundle at the front of batch 1
///
/// Only applies when there is more than one batch; a single message needs no
/// reassembly instructions.
pub fn attach_tool_bundle(batches: &mut [Batch], bundle: &Path, bundle_bytes: u64) -> bool {
    if batches.len() <= 1 {
        return false;
    }
    let first = &mut batches[0];
    first.files.insert(0, bundle.to_path_buf());
    first.total_bytes += bundle_bytes;
    true
}

/// Stat `parts`, partition them and place the optional tool bundle
///
/// With `reserve_tool_space` the bundle size is counted in batch 1's budget during
/// partitioning; without it batch 1 may exceed `ceiling` by the bundle size.
pub async fn plan_batches(
    parts: &[PathBuf],
    ceiling: u64,
    tool_bundle: Option<&Path>,
    reserve_tool_space: bool,
) -> Result<Vec<Batch>> {
    let mut sized = Vec::with_capacity(parts.len());
    for part in parts {
        let size = tokio::fs::metadata(part).await?.len();
        sized.push((part.clone(), size));
    }

    let bundle_bytes = match tool_bundle {
        Some(bundle) => tokio::fs::metadata(bundle).await?.len(),
        None => 0,
    };
    let reserved = if reserve_tool_space { bundle_bytes } else { 0 };

    let mut batches = partition(&sized, ceiling, reserved);
    if let Some(bundle) = tool_bundle {
        attach_tool_bundle(&mut batches, bundle, bundle_bytes);
    }
    Ok(batches)
}
