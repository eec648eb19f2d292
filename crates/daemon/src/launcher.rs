// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process launch and exit capture.
//!
//! The central handoff: a task's stdout *is* the client's socket. The
//! launcher duplicates the connection's socket into the child's fd 1, so
//! task output flows kernel-to-client without the daemon copying a byte.

use std::net::TcpStream;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// A child's captured termination, drained by the event loop.
#[derive(Debug)]
pub struct Completion {
    pub pid: u32,
    pub status: std::process::ExitStatus,
}

/// Spawn a task with its stdout bound to the client's socket.
///
/// `argv[0]` is the bare task name; stderr shares the daemon's stderr so
/// task diagnostics land in the daemon log; stdin is closed. Everything
/// else the daemon holds is close-on-exec, so the child inherits no other
/// descriptors.
pub fn spawn_task(
    path: &Path,
    name: &str,
    args: &[String],
    stdout: TcpStream,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(path);
    cmd.arg0(name)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(OwnedFd::from(stdout)))
        .stderr(Stdio::inherit());
    cmd.spawn()
}

/// Start the waiter thread that reaps one child.
///
/// The blocking `wait` happens off the event loop; the termination is
/// posted to the completion queue exactly once, with `try_send` so a full
/// queue can never stall the waiter.
pub fn spawn_waiter(mut child: Child, tx: mpsc::Sender<Completion>) -> std::io::Result<()> {
    let pid = child.id();
    std::thread::Builder::new()
        .name(format!("task-waiter-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => match tx.try_send(Completion { pid, status }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(pid, "completion queue full; dropping task exit event");
                }
                Err(TrySendError::Closed(_)) => {
                    // Daemon is shutting down; nobody is listening.
                }
            },
            Err(e) => warn!(pid, error = %e, "wait for task failed"),
        })?;
    Ok(())
}
