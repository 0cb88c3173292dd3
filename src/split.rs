//! Splitting archives into fixed-size parts
//!
//! Parts are named `<archive-name>.001`, `<archive-name>.002`, ... so that sorting by
//! name restores order and plain concatenation restores the archive byte-for-byte.
//! The three-digit suffix caps a split at [`MAX_PARTS`] parts.

use crate::error::{Error, Result};
use crate::pipeline::CleanupSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

/// Copy buffer for streaming a chunk from the archive into its part file
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Most parts one archive can be split into while keeping three-digit suffixes
pub const MAX_PARTS: u64 = 999;

/// Name of part `index` (1-based) of `archive`
///
/// # Examples
///
/// ```
/// use mailvault::split::part_path;
/// use std::path::Path;
///
/// let part = part_path(Path::new("/tmp/backup_docs.zip"), 3);
/// assert_eq!(part, Path::new("/tmp/backup_docs.zip.003"));
/// ```
pub fn part_path(archive: &Path, index: usize) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{index:03}"));
    archive.with_file_name(name)
}

/// Splits archives above a size ceiling
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    chunk_size: u64,
}

impl Splitter {
    /// Create a splitter with the given part size in bytes
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Part size in bytes
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Split `archive` without blocking the async runtime
    pub async fn split(&self, archive: &Path, cleanup: &CleanupSet) -> Result<Vec<PathBuf>> {
        let this = *self;
        let archive_owned = archive.to_path_buf();
        let cleanup = cleanup.clone();

        spawn_blocking(move || this.split_blocking(&archive_owned, &cleanup))
            .await
            .map_err(|e| Error::Unexpected(format!("split task panicked: {e}")))?
    }

    /// Split `archive` into parts of at most `chunk_size` bytes
    ///
    /// An archive that already fits is returned as-is in a one-element list, without
    /// copying. An archive needing more than [`MAX_PARTS`] parts is refused before any
    /// part is written. Part files are created exclusively (an existing file of the
    /// same name is an error, never overwritten) and registered with `cleanup` before
    /// anything is written to them, so a failure halfway leaves nothing behind once the
    /// set is purged.
    pub fn split_blocking(&self, archive: &Path, cleanup: &CleanupSet) -> Result<Vec<PathBuf>> {
        let size = std::fs::metadata(archive)
            .map_err(|e| split_failed(archive, format!("failed to stat archive: {e}")))?
            .len();

        if size <= self.chunk_size {
            debug!(?archive, size, "archive within chunk size, not splitting");
            return Ok(vec![archive.to_path_buf()]);
        }

        let part_count = size.div_ceil(self.chunk_size);
        if part_count > MAX_PARTS {
            return Err(split_failed(
                archive,
                format!(
                    "{size} bytes at {} bytes per part needs {part_count} parts, at most {MAX_PARTS} are supported",
                    self.chunk_size
                ),
            ));
        }

        let mut reader = BufReader::with_capacity(
            COPY_BUFFER_SIZE,
            File::open(archive)
                .map_err(|e| split_failed(archive, format!("failed to open archive: {e}")))?,
        );

        let mut parts = Vec::with_capacity(part_count as usize);
        let mut remaining = size;
        for index in 1..=part_count as usize {
            let expected = remaining.min(self.chunk_size);
            let part = part_path(archive, index);
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&part)
                .map_err(|e| {
                    split_failed(archive, format!("failed to create {}: {e}", part.display()))
                })?;
            cleanup.register(&part);

            let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
            let copied = std::io::copy(&mut (&mut reader).take(expected), &mut writer)
                .and_then(|n| writer.flush().map(|()| n))
                .map_err(|e| {
                    split_failed(archive, format!("failed to write {}: {e}", part.display()))
                })?;

            if copied != expected {
                return Err(split_failed(
                    archive,
                    format!(
                        "archive shrank while splitting: part {index} got {copied} of {expected} bytes"
                    ),
                ));
            }

            debug!(?part, bytes = copied, "wrote part");
            remaining -= copied;
            parts.push(part);
        }

        info!(?archive, size, parts = parts.len(), "archive split");
        Ok(parts)
    }
}

fn split_failed(archive: &Path, reason: String) -> Error {
    Error::SplitFailed {
        archive: archive.to_path_buf(),
        reason,
    }
}
