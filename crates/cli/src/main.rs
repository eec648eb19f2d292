// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tasking daemon client (td)
//!
//! Opens a control connection and a task-exec connection to a remote
//! daemon and proxies a line-oriented REPL to them, or runs a single task
//! and exits when its stream completes.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;

use anyhow::Result;
use clap::Parser;

/// Line-oriented client for a remote tasking daemon.
#[derive(Parser, Debug)]
#[command(name = "td", version, about = "Tasking daemon client")]
struct Args {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(short = 'p', long, default_value_t = td_wire::DEFAULT_PORT)]
    port: u16,

    /// Execute this task and exit when it completes
    #[arg(short = 't', long)]
    task: Option<String>,

    /// Print connection diagnostics
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments passed to the task
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    client::run(
        &args.host,
        args.port,
        args.task.as_deref(),
        &args.args,
        args.verbose > 0,
    )
    .await
}
