//! Fixed exclusion list for transient paths
//!
//! Patterns are scoped under the archive root (the source's base name), so
//! `docs/**/.git` prunes version-control metadata anywhere inside `docs` but never
//! a sibling directory that merely shares a name with the source.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Directory names that never belong in a backup
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    ".cache",
    "__pycache__",
    ".Trash",
    ".Trash-*",
    ".local/share/Trash",
];

/// File patterns for socket-like entries that cannot be archived meaningfully
pub const EXCLUDED_FILES: &[&str] = &["*.sock", "*.socket"];

/// Compiled exclusion patterns for one archive root
#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    set: GlobSet,
}

impl ExclusionMatcher {
    /// Build the matcher for an archive rooted at `base_name`
    ///
    /// `extra` patterns are relative to the source directory and are applied on top
    /// of the built-in list.
    pub fn new(base_name: &str, extra: &[String]) -> Result<Self> {
        let root = escape_glob(base_name);
        let mut builder = GlobSetBuilder::new();

        for dir in EXCLUDED_DIRS {
            add_pattern(&mut builder, &format!("{root}/**/{dir}"))?;
            add_pattern(&mut builder, &format!("{root}/**/{dir}/**"))?;
        }
        for file in EXCLUDED_FILES {
            add_pattern(&mut builder, &format!("{root}/**/{file}"))?;
        }
        for pattern in extra {
            let pattern = pattern.trim().trim_start_matches('/');
            if pattern.is_empty() {
                continue;
            }
            add_pattern(&mut builder, &format!("{root}/{pattern}"))?;
        }

        let set = builder.build().map_err(|e| Error::Config {
            message: format!("invalid exclusion pattern set: {e}"),
            key: Some("pipeline.extra_exclusions".into()),
        })?;
        Ok(Self { set })
    }

    /// Whether an archive entry name (`base/relative/path`, `/`-separated) is excluded
    pub fn is_excluded(&self, entry_name: &str) -> bool {
        self.set.is_match(entry_name)
    }
}

fn add_pattern(builder: &mut GlobSetBuilder, pattern: &str) -> Result<()> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map_err(|e| Error::Config {
            message: format!("invalid exclusion pattern '{pattern}': {e}"),
            key: Some("pipeline.extra_exclusions".into()),
        })?;
    builder.add(glob);
    Ok(())
}

/// Escape glob metacharacters so a literal directory name matches only itself
fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
