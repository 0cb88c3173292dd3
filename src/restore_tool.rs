//! Restore tooling for split archives
//!
//! When an archive goes out in several parts, the recipient gets a small bundle with
//! two scripts that glue the parts back together with nothing but the stock shell of
//! their OS:
//!
//! - `windows_restore.bat` uses `copy /b` (binary concatenation), then pauses
//! - `linux_restore.sh` uses `cat`
//!
//! Both reference parts by basename and expect to run from the folder holding them.

use crate::error::{Error, Result};
use crate::pipeline::CleanupSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Windows script name
pub const WINDOWS_SCRIPT: &str = "windows_restore.bat";
/// Unix script name
pub const UNIX_SCRIPT: &str = "linux_restore.sh";
/// Bundle archive name
pub const BUNDLE_NAME: &str = "restore_tool.zip";
/// File the scripts reconstruct
pub const RESTORED_NAME: &str = "full_restored.zip";

/// Files produced for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTool {
    /// The bundle to attach
    pub bundle: PathBuf,
    /// Every path written, bundle included, in creation order
    pub created: Vec<PathBuf>,
}

/// Render the Windows restore script (CRLF line endings)
pub fn windows_script(part_names: &[String]) -> String {
    let sources = part_names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(" + ");
    [
        "@echo off".to_string(),
        "cd /d \"%~dp0\"".to_string(),
        format!("echo Restoring {RESTORED_NAME} from {} parts...", part_names.len()),
        format!("copy /b {sources} \"{RESTORED_NAME}\""),
        format!("echo Done. Extract {RESTORED_NAME} to recover the backup."),
        "pause".to_string(),
    ]
    .join("\r\n")
        + "\r\n"
}

/// Render the Unix restore script
pub fn unix_script(part_names: &[String]) -> String {
    let sources = part_names
        .iter()
        .map(|name| shell_quote(name))
        .collect::<Vec<_>>()
        .join(" ");
    [
        "#!/bin/sh".to_string(),
        "set -e".to_string(),
        "cd \"$(dirname \"$0\")\"".to_string(),
        format!("echo \"Restoring {RESTORED_NAME} from {} parts...\"", part_names.len()),
        format!("cat {sources} > {RESTORED_NAME}"),
        format!("echo \"Done. Extract {RESTORED_NAME} to recover the backup.\""),
    ]
    .join("\n")
        + "\n"
}

/// Single-quote a word for POSIX sh
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Builds restore scripts and their bundle
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreToolBuilder;

impl RestoreToolBuilder {
    /// Build the tool without blocking the async runtime
    pub async fn build(
        &self,
        part_names: &[String],
        out_dir: &Path,
        cleanup: &CleanupSet,
    ) -> Result<RestoreTool> {
        let names = part_names.to_vec();
        let dir = out_dir.to_path_buf();
        let cleanup = cleanup.clone();

        spawn_blocking(move || RestoreToolBuilder.build_blocking(&names, &dir, &cleanup))
            .await
            .map_err(|e| Error::Unexpected(format!("restore tool task panicked: {e}")))?
    }

    /// Write both scripts and bundle them into `out_dir/restore_tool.zip`
    ///
    /// `out_dir` must not exist yet: it is created exclusively, so a directory left by
    /// another run is an error rather than shared. Every path is registered with
    /// `cleanup` before it is written.
    pub fn build_blocking(
        &self,
        part_names: &[String],
        out_dir: &Path,
        cleanup: &CleanupSet,
    ) -> Result<RestoreTool> {
        debug!(?out_dir, parts = part_names.len(), "building restore tool");

        std::fs::create_dir(out_dir).map_err(|e| tool_failed(out_dir, e))?;
        cleanup.register(out_dir);

        let windows = out_dir.join(WINDOWS_SCRIPT);
        let unix = out_dir.join(UNIX_SCRIPT);
        let bundle = out_dir.join(BUNDLE_NAME);

        let scripts = [
            (&windows, windows_script(part_names), 0o644),
            (&unix, unix_script(part_names), 0o755),
        ];
        for (path, contents, _) in &scripts {
            cleanup.register(*path);
            std::fs::write(path, contents).map_err(|e| tool_failed(path, e))?;
        }

        cleanup.register(&bundle);
        let file = std::fs::File::create(&bundle).map_err(|e| tool_failed(&bundle, e))?;
        let mut writer = ZipWriter::new(file);
        for (path, contents, mode) in &scripts {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(*mode);
            writer
                .start_file(name, options)
                .map_err(|e| tool_failed(&bundle, e))?;
            writer
                .write_all(contents.as_bytes())
                .map_err(|e| tool_failed(&bundle, e))?;
        }
        writer.finish().map_err(|e| tool_failed(&bundle, e))?;

        info!(?bundle, parts = part_names.len(), "restore tool built");

        Ok(RestoreTool {
            bundle: bundle.clone(),
            created: vec![windows, unix, bundle],
        })
    }
}

fn tool_failed(path: &Path, error: impl std::fmt::Display) -> Error {
    Error::ToolGenerationFailed {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}
