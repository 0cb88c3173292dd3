//! Message composition
//!
//! Subjects carry a `[i/N]` sequence marker whenever a run spans several messages, so a
//! recipient can tell at a glance whether every part arrived.

use crate::restore_tool::{BUNDLE_NAME, UNIX_SCRIPT, WINDOWS_SCRIPT};
use chrono::{DateTime, Local};
use std::path::PathBuf;

/// A fully composed message ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Sender address (the authenticated account)
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Files attached as opaque binary parts, in order
    pub attachments: Vec<PathBuf>,
}

/// Subject for batch `index` (1-based) of `total`
pub fn subject(prefix: &str, index: usize, total: usize, now: DateTime<Local>) -> String {
    let date = now.format("%Y-%m-%d");
    if total > 1 {
        format!("{prefix} [{index}/{total}] - {date}")
    } else {
        format!("{prefix} - {date}")
    }
}

/// Plain-text body for batch `index` (1-based) of `total`
pub fn body(
    task_name: &str,
    host: &str,
    now: DateTime<Local>,
    index: usize,
    total: usize,
) -> String {
    let mut text = format!(
        "Automated backup\n\n\
         Task: {task_name}\n\
         Host: {host}\n\
         Time: {}\n",
        now.format("%Y-%m-%d %H:%M:%S %:z")
    );

    if total > 1 {
        text.push_str(&format!("Message: {index} of {total}\n"));
    }

    if total > 1 && index == 1 {
        text.push_str(&format!(
            "\nThis backup was split across {total} messages.\n\
             To restore it:\n\
             1. Save every attachment from all {total} messages into one folder.\n\
             2. Extract {BUNDLE_NAME} (attached to this message) into the same folder.\n\
             3. Run {WINDOWS_SCRIPT} on Windows, or `sh {UNIX_SCRIPT}` on Linux/macOS.\n\
             4. Open the resulting full_restored.zip.\n"
        ));
    }

    text
}
