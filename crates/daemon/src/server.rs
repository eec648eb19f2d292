// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon core: one event-loop task multiplexing the listener, client
//! requests, and task completions.
//!
//! Architecture:
//! - Reader threads: one per connection, forwarding framed requests
//! - Waiter threads: one per child, posting terminations to the queue
//! - Event loop: this task, the only owner of the tables
//!
//! Everything that touches the task registry or the connection table runs
//! here, sequentially. Completions are drained ahead of request dispatch,
//! so a status query issued after a task's `[EOT]` always observes the
//! terminal state.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use td_core::limits::MAX_ERRORS;
use td_core::TaskState;
use td_wire::{parse_request, reply, ParseError, Request};

use crate::conn::ConnTable;
use crate::launcher::{self, Completion};
use crate::lifecycle::Config;
use crate::reader::{self, Event};
use crate::registry::{FinishedTask, TaskRegistry};
use crate::resolver;

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A `shutdown` request or a termination signal.
    Requested,
    /// Too many consecutive listener failures.
    Fatal,
}

/// Reader-event channel depth; readers park when the loop falls behind.
const EVENT_QUEUE: usize = 256;

/// All daemon state, owned by the event-loop task.
struct DaemonState {
    conns: ConnTable,
    tasks: TaskRegistry,
    search_path: Vec<PathBuf>,
    events: mpsc::Sender<Event>,
    completions: mpsc::Sender<Completion>,
    shutting_down: bool,
}

/// Run the daemon event loop until shutdown.
pub async fn run(config: Config, listener: TcpListener) -> LoopExit {
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);
    let (done_tx, mut done_rx) = mpsc::channel(config.max_tasks.max(1));
    let mut state = DaemonState::new(&config, event_tx, done_tx);

    let (mut sigint, mut sighup) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::hangup())) {
            (Ok(int), Ok(hup)) => (int, hup),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "signal handler registration failed");
                return LoopExit::Fatal;
            }
        };

    let mut accept_errors: u32 = 0;

    loop {
        tokio::select! {
            biased;

            Some(done) = done_rx.recv() => state.finish_task(done),

            Some(event) = event_rx.recv() => {
                // Drain completions first: a request that follows a task's
                // [EOT] must see the slot in its terminal state.
                while let Ok(done) = done_rx.try_recv() {
                    state.finish_task(done);
                }
                state.on_event(event);
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    accept_errors = 0;
                    state.accept(stream, addr);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    accept_errors += 1;
                    if accept_errors > MAX_ERRORS {
                        error!("too many accept errors; giving up");
                        return LoopExit::Fatal;
                    }
                }
            },

            _ = sigint.recv() => {
                info!("SIGINT received, shutting down");
                state.shutting_down = true;
            }

            _ = sighup.recv() => {
                info!("SIGHUP received, shutting down");
                state.shutting_down = true;
            }
        }

        if state.shutting_down {
            break;
        }
    }

    state.close_all();
    LoopExit::Requested
}

impl DaemonState {
    fn new(
        config: &Config,
        events: mpsc::Sender<Event>,
        completions: mpsc::Sender<Completion>,
    ) -> Self {
        Self {
            conns: ConnTable::new(config.max_clients),
            tasks: TaskRegistry::new(config.max_tasks),
            search_path: config.search_path.clone(),
            events,
            completions,
            shutting_down: false,
        }
    }

    /// Register an accepted connection and start its reader thread.
    ///
    /// The socket is switched back to blocking mode: its file description
    /// is handed to children as stdout, and `O_NONBLOCK` would ride along.
    fn accept(&mut self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let adopted = stream
            .into_std()
            .and_then(|s| s.set_nonblocking(false).map(|()| s));
        let stream = match adopted {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to adopt accepted connection");
                return;
            }
        };

        let reader_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(error = %e, "failed to clone accepted connection");
                return;
            }
        };

        let Some((conn, epoch)) = self.conns.add(stream) else {
            warn!(%addr, "refused client connection: table full");
            return;
        };

        if let Err(e) = reader::spawn(conn, epoch, reader_stream, self.events.clone()) {
            warn!(conn, error = %e, "failed to start connection reader");
            self.close_connection(conn, false, 0);
            return;
        }

        debug!(conn, %addr, "added client connection");
    }

    /// Handle one event forwarded by a reader thread.
    fn on_event(&mut self, event: Event) {
        match event {
            Event::Request { conn, epoch, line } => {
                let Some(entry) = self.conns.get(conn) else {
                    return; // connection already closed
                };
                if entry.epoch != epoch {
                    return; // stale reader for a reused id
                }
                if entry.busy {
                    // The socket belongs to a running task until its [EOT]
                    // line is out; hold the request until then.
                    if let Some(entry) = self.conns.get_mut(conn) {
                        entry.pending.push_back(line);
                    }
                    return;
                }
                self.dispatch(conn, &line);
            }
            Event::Disconnected { conn, epoch } => {
                let Some(entry) = self.conns.get(conn) else {
                    return;
                };
                if entry.epoch != epoch {
                    return;
                }
                debug!(conn, "client disconnected");
                self.close_connection(conn, false, 0);
            }
        }
    }

    /// Parse and dispatch a single request line.
    fn dispatch(&mut self, conn: usize, line: &str) {
        let request = match parse_request(line) {
            Ok(request) => request,
            Err(ParseError::Empty) => return,
            Err(e) => {
                self.send(conn, &reply::err(&e.to_string()));
                return;
            }
        };

        debug!(conn, request = ?request, "client request");

        match request {
            Request::Execute { name, args } => self.execute(conn, &name, &args),
            Request::Nop => {}
            Request::Status { slot } => self.status(conn, slot),
            Request::Kill { slot, signal } => self.kill(conn, slot, signal),
            Request::KillAll => self.kill_all(conn),
            Request::Connections => {
                let open = self.conns.open();
                self.send(conn, &reply::ok(&open.to_string()));
            }
            Request::Tasks { conn: which } => {
                let count = match which {
                    None => self.tasks.running(),
                    Some(owner) => self.tasks.running_for_conn(owner),
                };
                self.send(conn, &reply::ok(&count.to_string()));
            }
            Request::Close => {
                self.send(conn, &reply::ok(""));
                self.close_connection(conn, false, 0);
            }
            Request::Shutdown { now } => self.shutdown(conn, now),
        }
    }

    /// Launch a task with its stdout handed to the requesting connection.
    fn execute(&mut self, conn: usize, name: &str, args: &[String]) {
        let Some(path) = resolver::resolve(&self.search_path, name) else {
            self.send(conn, &reply::err(&format!("exec cannot find task: {name}")));
            return;
        };

        let handles = self
            .conns
            .get(conn)
            .map(|entry| (entry.epoch, entry.try_clone(), entry.try_clone()));
        let Some((epoch, child_stdout, cached)) = handles else {
            return;
        };
        let (Ok(child_stdout), Ok(cached)) = (child_stdout, cached) else {
            self.send(conn, &reply::err(&format!("exec process fork failed ({name})")));
            return;
        };

        let Some(slot) = self.tasks.allocate(conn, epoch, name, args) else {
            self.send(conn, &reply::err(&format!("exec out space for tasks ({name})")));
            return;
        };
        self.tasks.attach_stdout(slot, cached);

        // The acknowledgement must hit the socket before any task output.
        self.send(conn, &reply::ok(&slot.to_string()));

        let child = match launcher::spawn_task(&path, name, args, child_stdout) {
            Ok(child) => child,
            Err(e) => {
                // Same observable stream as an in-child exec failure: the
                // error line and a nonzero [EOT] follow the [OK] preamble.
                let errno = e.raw_os_error().unwrap_or(0);
                warn!(conn, task = name, error = %e, "task spawn failed");
                self.send(conn, &reply::err(&format!("task exec failed ({errno})")));
                let finished = self.tasks.finish(slot, TaskState::Completed, 1);
                send_eot(finished);
                return;
            }
        };

        let pid = child.id();
        match launcher::spawn_waiter(child, self.completions.clone()) {
            Ok(()) => {
                self.tasks.mark_running(slot, pid);
                if let Some(entry) = self.conns.get_mut(conn) {
                    entry.busy = true;
                }
                info!(conn, pid, task = name, slot, "task started");
            }
            Err(e) => {
                // No reaper means no exit capture; take the task down now.
                error!(pid, error = %e, "waiter thread spawn failed; killing task");
                signal_task(pid, Signal::SIGKILL as i32);
                self.send(conn, &reply::err(&format!("exec process fork failed ({name})")));
                let finished = self.tasks.finish(slot, TaskState::Interrupted, 1);
                send_eot(finished);
            }
        }
    }

    /// Finalize a terminated child: terminal state, `[EOT]`, pending pump.
    fn finish_task(&mut self, done: Completion) {
        use std::os::unix::process::ExitStatusExt;

        let Some(slot) = self.tasks.find_by_pid(done.pid) else {
            warn!(pid = done.pid, "no task slot for completed pid");
            return;
        };

        let (state, exit_status) = match done.status.code() {
            Some(code) => (TaskState::Completed, code),
            None => (
                TaskState::Interrupted,
                done.status.signal().map_or(1, |sig| 128 + sig),
            ),
        };

        let finished = self.tasks.finish(slot, state, exit_status);
        info!(
            slot,
            pid = done.pid,
            exit = exit_status,
            stat = state.as_str(),
            "task finished"
        );

        let conn = finished.conn;
        let epoch = finished.conn_epoch;
        if let Some(entry) = self.conns.get_mut(conn) {
            if entry.epoch == epoch {
                entry.busy = false;
            }
        }

        send_eot(finished);
        self.pump_pending(conn, epoch);
    }

    /// Dispatch requests that queued while the connection was busy.
    fn pump_pending(&mut self, conn: usize, epoch: u64) {
        loop {
            let line = {
                let Some(entry) = self.conns.get_mut(conn) else {
                    return;
                };
                if entry.epoch != epoch || entry.busy {
                    return;
                }
                match entry.pending.pop_front() {
                    Some(line) => line,
                    None => return,
                }
            };
            self.dispatch(conn, &line);
        }
    }

    /// `status` — the whole table, or one slot.
    fn status(&mut self, conn: usize, slot: Option<usize>) {
        match slot {
            None => {
                let mut out = reply::ok(&format!(
                    "nconn={} ntasks={}",
                    self.conns.open(),
                    self.tasks.running()
                ));
                for snap in self.tasks.snapshots() {
                    out.push_str(&format!(
                        "task={} conn={} stat={} exit={} cmd: {} {}\n",
                        snap.slot, snap.conn, snap.state, snap.exit_status, snap.name, snap.args
                    ));
                }
                out.push_str(&reply::eot_bare());
                self.send(conn, &out);
            }
            Some(slot) => {
                let Some(snap) = self.tasks.snapshot(slot) else {
                    self.send(conn, &reply::err(&format!("invalid task number ({slot})")));
                    return;
                };
                self.send(
                    conn,
                    &reply::ok(&format!(
                        "task {} {} {} ({})",
                        snap.slot, snap.state, snap.exit_status, snap.name
                    )),
                );
            }
        }
    }

    /// `kill` — signal a running task (SIGHUP by default).
    fn kill(&mut self, conn: usize, slot: usize, sig: Option<i32>) {
        if slot >= self.tasks.capacity() {
            self.send(conn, &reply::err(&format!("invalid task number ({slot})")));
            return;
        }
        let Some(pid) = self.tasks.pid_of(slot) else {
            self.send(conn, &reply::err(&format!("no task running in slot {slot}")));
            return;
        };
        let sig = sig.unwrap_or(Signal::SIGHUP as i32);
        if signal_task(pid, sig) {
            self.send(conn, &reply::ok(""));
        } else {
            self.send(conn, &reply::err(&format!("cannot signal task {slot}")));
        }
    }

    /// `killall` — SIGHUP every running task.
    fn kill_all(&mut self, conn: usize) {
        let running = self.tasks.running();
        for pid in self.tasks.live_pids() {
            signal_task(pid, Signal::SIGHUP as i32);
        }
        self.send(conn, &reply::ok(&running.to_string()));
    }

    /// `shutdown` — refused while tasks run, unless forced with `now`.
    fn shutdown(&mut self, conn: usize, now: bool) {
        let running = self.tasks.running();
        if running > 0 && !now {
            self.send(conn, &reply::err(&format!("{running} tasks are still running")));
            return;
        }
        self.send(conn, &reply::ok(""));
        info!("shutdown requested");
        self.shutting_down = true;
    }

    /// Close a connection, optionally signalling its tasks first.
    fn close_connection(&mut self, conn: usize, killtasks: bool, sig: i32) {
        if killtasks {
            if let Some(entry) = self.conns.get(conn) {
                for pid in self.tasks.live_for_conn(conn, entry.epoch) {
                    signal_task(pid, sig);
                }
            }
        }
        self.conns.close(conn);
    }

    /// Write a reply line; a failed write drops the connection silently.
    fn send(&mut self, conn: usize, data: &str) {
        if self.conns.send(conn, data).is_err() {
            debug!(conn, "reply write failed; dropping connection");
            self.close_connection(conn, false, 0);
        }
    }

    /// Tear down every connection on shutdown, signalling bound tasks.
    fn close_all(&mut self) {
        for conn in 0..self.conns.capacity() {
            if self.conns.get(conn).is_some() {
                self.close_connection(conn, true, Signal::SIGHUP as i32);
            }
        }
    }
}

/// Write the `[EOT]` line on a task's cached client socket.
///
/// The cached handle outlives the connection entry, so a task whose client
/// already disconnected still gets its line written (and silently lost).
fn send_eot(finished: FinishedTask) {
    let line = reply::eot(finished.slot, finished.exit_status);
    match finished.stdio {
        Some(mut stream) => {
            if let Err(e) = stream.write_all(line.as_bytes()) {
                debug!(slot = finished.slot, error = %e, "EOT write failed");
            }
        }
        None => debug!(slot = finished.slot, "no cached socket for EOT"),
    }
}

/// Deliver a signal to a task process.
fn signal_task(pid: u32, sig: i32) -> bool {
    let Ok(sig) = Signal::try_from(sig) else {
        warn!(pid, sig, "invalid signal number");
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig) {
        Ok(()) => true,
        Err(e) => {
            warn!(pid, error = %e, "signal delivery failed");
            false
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
