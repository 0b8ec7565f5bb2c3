//! Bounded workspace walker with the default skip set.
//!
//! The skip set covers repository metadata, build outputs, dependency
//! trees, and virtual environments; dot-entries are treated as metadata
//! and excluded wholesale. Large binaries are skipped by size.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directory names that are never descended into.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
];

const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Whether a directory entry name is excluded from walks.
pub fn is_skipped(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

/// Walk `root` and return up to `limit` file paths relative to it, sorted.
/// `limit = 0` means unbounded.
pub fn walk(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            // Never filter out the root itself.
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .map(|n| !is_skipped(n))
                    .unwrap_or(false)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.metadata()
                .map(|m| m.len() <= MAX_FILE_BYTES)
                .unwrap_or(false)
        })
        .filter_map(|e| e.path().strip_prefix(root).ok().map(PathBuf::from))
        .collect();

    entries.sort();
    if limit > 0 {
        entries.truncate(limit);
    }
    entries
}
