//! Utility functions for filenames, timestamps and host identification

use chrono::{DateTime, Local};

/// Format used to stamp ephemeral filenames, one-second resolution
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Reduce a task name to characters safe in a filename on every platform
///
/// Runs of anything other than ASCII alphanumerics, `-` and `_` collapse into a single
/// `_`. An empty result becomes `"task"`.
///
/// # Examples
///
/// ```
/// use mailvault::utils::sanitize_file_stem;
///
/// assert_eq!(sanitize_file_stem("My Docs / 2024"), "My_Docs_2024");
/// assert_eq!(sanitize_file_stem("***"), "task");
/// ```
pub fn sanitize_file_stem(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "task".into()
    } else {
        out
    }
}

/// Timestamp component for a run's ephemeral filenames
pub fn run_stamp(now: DateTime<Local>) -> String {
    now.format(RUN_STAMP_FORMAT).to_string()
}

/// Best-effort identifier of the executing host
///
/// Falls back to the `HOSTNAME`/`COMPUTERNAME` environment variables, then `"unknown-host"`.
pub fn host_name() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: This is safe because:
        // 1. buf is a valid, writable buffer and its exact length is passed
        // 2. We check the return value before reading the buffer
        // 3. The result is truncated at the first NUL (or the buffer end), never read past it
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
        if rc == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown-host".into())
}
