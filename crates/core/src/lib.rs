// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core domain types for the tasking daemon.
//!
//! No I/O lives here: task lifecycle states, argument summaries, and the
//! table limits shared by the daemon and its clients.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod limits;
mod task;

pub use task::{summarize_args, TaskState};
