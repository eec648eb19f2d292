// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tasking Daemon (tdd)
//!
//! Long-lived server that executes named tasks as child processes on behalf
//! of TCP clients, handing each task's stdout directly to the requesting
//! connection.
//!
//! Architecture:
//! - Reader threads: per-connection socket I/O, framed requests to the loop
//! - Waiter threads: per-child exit capture onto the completion queue
//! - Event loop: single task owning the connection and task tables

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod conn;
mod env;
mod launcher;
mod lifecycle;
mod reader;
mod registry;
mod resolver;
mod server;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::lifecycle::Config;
use crate::server::LoopExit;
use td_core::limits::{MAX_CONNECTIONS, MAX_TASKS};

/// Exit code for the event-loop fatal path.
const EXIT_LOOP_FATAL: i32 = 10;

/// Tasking daemon: executes tasks for TCP clients.
#[derive(Parser, Debug)]
#[command(name = "tdd", version, about = "Tasking daemon")]
struct Args {
    /// Add a directory to the task search path (repeatable)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Listening port (0 asks the OS for a free port)
    #[arg(short = 'p', long, default_value_t = td_wire::DEFAULT_PORT)]
    port: u16,

    /// Append diagnostics to this file instead of stderr
    #[arg(short = 'l', long, value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Detach into the background before entering the main loop
    #[arg(short = 's', long)]
    daemon: bool,

    /// Increase diagnostic verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Client connection table capacity
    #[arg(long, value_name = "N", default_value_t = MAX_CONNECTIONS)]
    max_clients: usize,

    /// Task table capacity
    #[arg(long, value_name = "N", default_value_t = MAX_TASKS)]
    max_tasks: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut search_path = args.dirs;
    search_path.extend(env::task_path());

    let config = Config {
        port: args.port,
        search_path,
        max_clients: args.max_clients,
        max_tasks: args.max_tasks,
        logfile: args.logfile,
        verbose: args.verbose,
    };

    if let Err(e) = config.validate() {
        eprintln!("tdd: {e}");
        std::process::exit(e.exit_code());
    }

    if args.daemon {
        // Re-exec detached; the child re-parses the same flags minus -s.
        match lifecycle::daemonize() {
            Ok(()) => return,
            Err(e) => {
                eprintln!("tdd: {e}");
                std::process::exit(e.exit_code());
            }
        }
    }

    let log_guard = match lifecycle::setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("tdd: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let listener = match lifecycle::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("tdd: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let port = listener
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or(config.port);
    info!(port, max_clients = config.max_clients, max_tasks = config.max_tasks,
        "tasking daemon listening");

    // Startup handshake for supervisors and tests.
    println!("READY {port}");

    let code = match server::run(config, listener).await {
        LoopExit::Requested => 0,
        LoopExit::Fatal => EXIT_LOOP_FATAL,
    };
    info!("daemon stopped");
    // process::exit skips destructors; flush buffered log lines first.
    drop(log_guard);
    std::process::exit(code);
}
