// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Extra task search directories from `TD_TASK_PATH` (colon separated),
/// appended after the `--dir` flags.
pub fn task_path() -> Vec<PathBuf> {
    std::env::var("TD_TASK_PATH")
        .map(|raw| {
            raw.split(':')
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Log filter override from `TD_LOG` (tracing `EnvFilter` syntax).
/// When unset, the filter is derived from `--verbose`.
pub fn log_filter() -> Option<String> {
    std::env::var("TD_LOG").ok().filter(|s| !s.is_empty())
}
