//! Archive creation
//!
//! Compresses a source directory into a single ZIP file rooted at the directory's own
//! base name, so extracting the archive recreates `docs/...` rather than spilling its
//! contents into the current directory. Compression runs in-process through the `zip`
//! crate; no shell or external binary ever sees task-supplied paths or passwords.

mod exclusions;

pub use exclusions::{EXCLUDED_DIRS, EXCLUDED_FILES, ExclusionMatcher};

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::{File, Metadata};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries above this size need zip64 extensions
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Result of a successful compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// The archive that was written
    pub path: PathBuf,
    /// Archive size on disk
    pub bytes: u64,
    /// Number of file and directory entries written
    pub entries: usize,
    /// Entries skipped because they vanished or were not regular files
    pub skipped: usize,
}

/// Archiver for ZIP backups
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    extra_exclusions: Vec<String>,
}

impl Archiver {
    /// Create an archiver applying `extra_exclusions` on top of the built-in list
    pub fn new(extra_exclusions: Vec<String>) -> Self {
        Self { extra_exclusions }
    }

    /// Compress `source` into `output` without blocking the async runtime
    pub async fn archive(
        &self,
        source: &Path,
        password: Option<&str>,
        output: &Path,
    ) -> Result<ArchiveSummary> {
        let this = self.clone();
        let source_owned = source.to_path_buf();
        let output_owned = output.to_path_buf();
        let password_owned = password.map(str::to_owned);

        spawn_blocking(move || {
            this.create_archive(&source_owned, password_owned.as_deref(), &output_owned)
        })
        .await
        .map_err(|e| Error::Unexpected(format!("archive task panicked: {e}")))?
    }

    /// Compress `source` into `output`
    ///
    /// A missing source is `SourceNotFound`. Entries that disappear between the
    /// directory walk and the read are skipped with a warning; any other failure, or
    /// an output file missing after completion, is `CompressionFailed`.
    pub fn create_archive(
        &self,
        source: &Path,
        password: Option<&str>,
        output: &Path,
    ) -> Result<ArchiveSummary> {
        let source = std::fs::canonicalize(source).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                compression_failed(output, format!("failed to resolve source: {e}"))
            }
        })?;

        let base_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".into());
        let matcher = ExclusionMatcher::new(&base_name, &self.extra_exclusions)?;
        let password = password.map(str::trim).filter(|p| !p.is_empty());

        debug!(
            ?source,
            ?output,
            encrypted = password.is_some(),
            "creating archive"
        );

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                compression_failed(output, format!("failed to create output directory: {e}"))
            })?;
        }
        let file = File::create(output)
            .map_err(|e| compression_failed(output, format!("failed to create archive: {e}")))?;

        let mut session = ArchiveSession {
            writer: ZipWriter::new(BufWriter::new(file)),
            output,
            password,
            entries: 0,
            skipped: 0,
        };

        // Never archive our own output when the temp directory sits inside the source
        let output_dir = output
            .parent()
            .and_then(|p| std::fs::canonicalize(p).ok());

        if source.is_dir() {
            session.add_tree(&source, &base_name, &matcher, output_dir.as_deref())?;
        } else {
            let metadata = std::fs::metadata(&source).map_err(|e| {
                compression_failed(output, format!("failed to stat source: {e}"))
            })?;
            session.add_file(&source, &base_name, &metadata)?;
        }

        let (entries, skipped) = (session.entries, session.skipped);
        let mut inner = session
            .writer
            .finish()
            .map_err(|e| compression_failed(output, format!("failed to finalize archive: {e}")))?;
        inner
            .flush()
            .map_err(|e| compression_failed(output, format!("failed to flush archive: {e}")))?;
        drop(inner);

        let bytes = match std::fs::metadata(output) {
            Ok(m) if m.is_file() => m.len(),
            _ => {
                return Err(compression_failed(
                    output,
                    "archive missing after completion".into(),
                ));
            }
        };

        if skipped > 0 {
            warn!(?output, skipped, "archive completed with skipped entries");
        }
        info!(?output, bytes, entries, "archive created");

        Ok(ArchiveSummary {
            path: output.to_path_buf(),
            bytes,
            entries,
            skipped,
        })
    }
}

/// Writer state for one archive
struct ArchiveSession<'a> {
    writer: ZipWriter<BufWriter<File>>,
    output: &'a Path,
    password: Option<&'a str>,
    entries: usize,
    skipped: usize,
}

impl ArchiveSession<'_> {
    fn add_tree(
        &mut self,
        source: &Path,
        base_name: &str,
        matcher: &ExclusionMatcher,
        output_dir: Option<&Path>,
    ) -> Result<()> {
        let walker = walkdir::WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry_name(source, base_name, entry.path());
                if matcher.is_excluded(&name) {
                    debug!(entry = %name, "excluded");
                    return false;
                }
                !(entry.file_type().is_dir() && Some(entry.path()) == output_dir)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_vanished(e.io_error()) => {
                    warn!(path = ?e.path(), "entry vanished during walk, skipping");
                    self.skipped += 1;
                    continue;
                }
                Err(e) => {
                    return Err(compression_failed(
                        self.output,
                        format!("failed to walk source: {e}"),
                    ));
                }
            };

            let path = entry.path();
            if path == self.output {
                continue;
            }
            let name = entry_name(source, base_name, path);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let metadata = entry.metadata().ok();
                self.add_directory(&name, metadata.as_ref())?;
            } else if file_type.is_file() {
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) if is_vanished(e.io_error()) => {
                        warn!(?path, "file vanished before read, skipping");
                        self.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        return Err(compression_failed(
                            self.output,
                            format!("failed to stat {}: {e}", path.display()),
                        ));
                    }
                };
                self.add_file(path, &name, &metadata)?;
            } else {
                // Symlinks, sockets, FIFOs and device nodes
                debug!(?path, "skipping non-regular entry");
                self.skipped += 1;
            }
        }
        Ok(())
    }

    fn add_directory(&mut self, name: &str, metadata: Option<&Metadata>) -> Result<()> {
        let options = base_options(metadata, 0);
        self.writer
            .add_directory(name, options)
            .map_err(|e| compression_failed(self.output, format!("failed to add {name}/: {e}")))?;
        self.entries += 1;
        Ok(())
    }

    fn add_file(&mut self, path: &Path, name: &str, metadata: &Metadata) -> Result<()> {
        let mut input = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(?path, "file vanished before read, skipping");
                self.skipped += 1;
                return Ok(());
            }
            Err(e) => {
                return Err(compression_failed(
                    self.output,
                    format!("failed to open {}: {e}", path.display()),
                ));
            }
        };

        let mut options = base_options(Some(metadata), metadata.len());
        if let Some(password) = self.password {
            use zip::unstable::write::FileOptionsExt;
            options = options.with_deprecated_encryption(password.as_bytes());
        }

        self.writer
            .start_file(name, options)
            .map_err(|e| compression_failed(self.output, format!("failed to add {name}: {e}")))?;
        std::io::copy(&mut input, &mut self.writer).map_err(|e| {
            compression_failed(self.output, format!("failed to compress {name}: {e}"))
        })?;
        self.entries += 1;
        Ok(())
    }
}

/// Archive entry name: base name plus the `/`-separated path relative to the source
fn entry_name(source: &Path, base_name: &str, path: &Path) -> String {
    let relative = path.strip_prefix(source).unwrap_or(path);
    let mut name = base_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

fn base_options(metadata: Option<&Metadata>, size: u64) -> FileOptions {
    let mut options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= ZIP64_THRESHOLD);

    if let Some(metadata) = metadata {
        if let Some(modified) = zip_timestamp(metadata) {
            options = options.last_modified_time(modified);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
        }
    }
    options
}

/// ZIP timestamps only cover 1980..=2107; anything else keeps the default
fn zip_timestamp(metadata: &Metadata) -> Option<zip::DateTime> {
    let modified: DateTime<Local> = metadata.modified().ok()?.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(modified.year()).ok()?,
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .ok()
}

fn is_vanished(error: Option<&std::io::Error>) -> bool {
    error.is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

fn compression_failed(archive: &Path, reason: String) -> Error {
    Error::CompressionFailed {
        archive: archive.to_path_buf(),
        reason,
    }
}
