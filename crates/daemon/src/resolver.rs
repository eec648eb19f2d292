// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task name resolution over the configured search path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve a task name to an executable path.
///
/// Absolute names are used verbatim. Otherwise the first search directory
/// holding an entry exactly equal to the name wins. Existence is the only
/// check here; a non-executable match surfaces later as a task-level spawn
/// failure. Unreadable directories are skipped.
pub fn resolve(search_path: &[PathBuf], name: &str) -> Option<PathBuf> {
    if name.starts_with('/') {
        return Some(PathBuf::from(name));
    }

    for dir in search_path {
        if dir_contains(dir, name) {
            return Some(dir.join(name));
        }
    }
    None
}

fn dir_contains(dir: &Path, name: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .flatten()
        .any(|entry| entry.file_name().as_os_str() == OsStr::new(name))
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
