// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::io::{BufRead, BufReader, Read};
use std::net::{TcpListener as StdTcpListener, TcpStream};
use std::time::Duration;

use tokio::sync::mpsc::Receiver;

/// A daemon state plus the receiving ends of its channels.
struct Fixture {
    state: DaemonState,
    done_rx: Receiver<Completion>,
    _event_rx: Receiver<Event>,
}

fn fixture(search_path: Vec<PathBuf>) -> Fixture {
    let config = Config {
        port: 0,
        search_path,
        max_clients: 8,
        max_tasks: 8,
        logfile: None,
        verbose: 0,
    };
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (done_tx, done_rx) = mpsc::channel(config.max_tasks);
    Fixture {
        state: DaemonState::new(&config, event_tx, done_tx),
        done_rx,
        _event_rx: event_rx,
    }
}

/// A connected (server, client) socket pair over loopback.
fn sock_pair() -> (TcpStream, BufReader<TcpStream>) {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, BufReader::new(client))
}

/// Register a socket pair as a daemon connection.
fn add_conn(state: &mut DaemonState) -> (usize, u64, BufReader<TcpStream>) {
    let (server, client) = sock_pair();
    let (conn, epoch) = state.conns.add(server).unwrap();
    (conn, epoch, client)
}

fn read_line(client: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    client.read_line(&mut line).unwrap();
    line
}

#[test]
fn status_on_idle_daemon() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "status");
    assert_eq!(read_line(&mut client), "[OK] nconn=1 ntasks=0\n");
    assert_eq!(read_line(&mut client), "[EOT]\n");
}

#[test]
fn unknown_requests_are_reported() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "frobnicate now");
    assert_eq!(read_line(&mut client), "[ERR] unknown request: frobnicate\n");
}

#[test]
fn nop_stays_silent() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "nop");
    client
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut buf = [0u8; 1];
    assert!(client.get_ref().read(&mut buf).is_err());
}

#[test]
fn close_replies_then_drops_the_connection() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "close");
    assert_eq!(read_line(&mut client), "[OK]\n");
    let mut rest = String::new();
    client.read_to_string(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert!(fx.state.conns.get(conn).is_none());
}

#[test]
fn execute_of_unknown_task_fails() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "execute ghost");
    assert_eq!(read_line(&mut client), "[ERR] exec cannot find task: ghost\n");
}

#[test]
fn execute_without_a_name_fails() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "execute");
    assert_eq!(read_line(&mut client), "[ERR] task name missing in exec request\n");
}

#[test]
fn out_of_range_status_slot_is_invalid() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "status 99");
    assert_eq!(read_line(&mut client), "[ERR] invalid task number (99)\n");
}

#[test]
fn kill_of_a_free_slot_is_invalid() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "kill 3");
    assert_eq!(read_line(&mut client), "[ERR] no task running in slot 3\n");
}

#[test]
fn shutdown_on_an_idle_daemon_is_immediate() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "shutdown");
    assert_eq!(read_line(&mut client), "[OK]\n");
    assert!(fx.state.shutting_down);
}

#[test]
fn execute_streams_output_then_eot() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "execute /bin/echo hello");
    assert!(fx.state.conns.get(conn).unwrap().busy);

    let done = fx.done_rx.blocking_recv().unwrap();
    fx.state.finish_task(done);

    assert_eq!(read_line(&mut client), "[OK] 0\n");
    assert_eq!(read_line(&mut client), "hello\n");
    assert_eq!(read_line(&mut client), "[EOT] 0 0\n");
    assert!(!fx.state.conns.get(conn).unwrap().busy);
}

#[test]
fn shutdown_is_guarded_by_running_tasks() {
    let mut fx = fixture(vec![]);
    let (task_conn, _, mut task_client) = add_conn(&mut fx.state);
    let (ctl_conn, _, mut ctl_client) = add_conn(&mut fx.state);

    fx.state.dispatch(task_conn, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut task_client), "[OK] 0\n");

    fx.state.dispatch(ctl_conn, "shutdown");
    assert_eq!(read_line(&mut ctl_client), "[ERR] 1 tasks are still running\n");
    assert!(!fx.state.shutting_down);

    // SIGKILL the task and let the completion settle.
    fx.state.dispatch(ctl_conn, "kill 0 9");
    assert_eq!(read_line(&mut ctl_client), "[OK]\n");
    let done = fx.done_rx.blocking_recv().unwrap();
    fx.state.finish_task(done);
    assert_eq!(read_line(&mut task_client), "[EOT] 0 137\n");

    fx.state.dispatch(ctl_conn, "status 0");
    assert_eq!(read_line(&mut ctl_client), "[OK] task 0 interrupted 137 (/bin/sleep)\n");

    fx.state.dispatch(ctl_conn, "shutdown");
    assert_eq!(read_line(&mut ctl_client), "[OK]\n");
    assert!(fx.state.shutting_down);
}

#[test]
fn busy_connections_defer_requests_until_eot() {
    let mut fx = fixture(vec![]);
    let (conn, epoch, mut client) = add_conn(&mut fx.state);
    let (ctl_conn, _, mut ctl_client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut client), "[OK] 0\n");

    // While busy, requests on the task connection queue up untouched.
    fx.state.on_event(Event::Request {
        conn,
        epoch,
        line: "ntasks".to_string(),
    });
    assert_eq!(fx.state.conns.get(conn).unwrap().pending.len(), 1);

    fx.state.dispatch(ctl_conn, "kill 0 9");
    assert_eq!(read_line(&mut ctl_client), "[OK]\n");
    let done = fx.done_rx.blocking_recv().unwrap();
    fx.state.finish_task(done);

    // The [EOT] precedes the deferred reply on the wire.
    assert_eq!(read_line(&mut client), "[EOT] 0 137\n");
    assert_eq!(read_line(&mut client), "[OK] 0\n");
    assert!(fx.state.conns.get(conn).unwrap().pending.is_empty());
}

#[test]
fn ntasks_counts_per_connection() {
    let mut fx = fixture(vec![]);
    let (task_conn, _, mut task_client) = add_conn(&mut fx.state);
    let (ctl_conn, _, mut ctl_client) = add_conn(&mut fx.state);

    fx.state.dispatch(task_conn, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut task_client), "[OK] 0\n");

    fx.state.dispatch(ctl_conn, "ntasks");
    assert_eq!(read_line(&mut ctl_client), "[OK] 1\n");
    fx.state.dispatch(ctl_conn, &format!("ntasks {task_conn}"));
    assert_eq!(read_line(&mut ctl_client), "[OK] 1\n");
    fx.state.dispatch(ctl_conn, &format!("ntasks {ctl_conn}"));
    assert_eq!(read_line(&mut ctl_client), "[OK] 0\n");

    fx.state.dispatch(ctl_conn, "kill 0 9");
    assert_eq!(read_line(&mut ctl_client), "[OK]\n");
    let done = fx.done_rx.blocking_recv().unwrap();
    fx.state.finish_task(done);
}

#[test]
fn killall_signals_every_running_task() {
    let mut fx = fixture(vec![]);
    let (conn_a, _, mut client_a) = add_conn(&mut fx.state);
    let (conn_b, _, mut client_b) = add_conn(&mut fx.state);
    let (ctl_conn, _, mut ctl_client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn_a, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut client_a), "[OK] 0\n");
    fx.state.dispatch(conn_b, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut client_b), "[OK] 1\n");

    fx.state.dispatch(ctl_conn, "killall");
    assert_eq!(read_line(&mut ctl_client), "[OK] 2\n");

    for _ in 0..2 {
        let done = fx.done_rx.blocking_recv().unwrap();
        fx.state.finish_task(done);
    }
    assert_eq!(fx.state.tasks.running(), 0);
    // SIGHUP terminations are recorded as interruptions.
    assert_eq!(read_line(&mut client_a), "[EOT] 0 129\n");
    assert_eq!(read_line(&mut client_b), "[EOT] 1 129\n");
}

#[test]
fn disconnect_event_frees_the_connection() {
    let mut fx = fixture(vec![]);
    let (conn, epoch, _client) = add_conn(&mut fx.state);

    // A stale epoch (reused id) must not touch the live connection.
    fx.state.on_event(Event::Disconnected { conn, epoch: epoch + 1 });
    assert!(fx.state.conns.get(conn).is_some());

    fx.state.on_event(Event::Disconnected { conn, epoch });
    assert!(fx.state.conns.get(conn).is_none());
}

#[test]
fn completion_for_an_unknown_pid_is_discarded() {
    let mut fx = fixture(vec![]);

    // Synthesize a completion nobody owns: run a throwaway child.
    let mut child = std::process::Command::new("/bin/true")
        .spawn()
        .unwrap();
    let status = child.wait().unwrap();
    fx.state.finish_task(Completion { pid: 999_999, status });
    assert_eq!(fx.state.tasks.running(), 0);
}

#[test]
fn close_does_not_kill_running_tasks() {
    let mut fx = fixture(vec![]);
    let (conn, _, mut client) = add_conn(&mut fx.state);
    let (ctl_conn, _, mut ctl_client) = add_conn(&mut fx.state);

    fx.state.dispatch(conn, "execute /bin/sleep 30");
    assert_eq!(read_line(&mut client), "[OK] 0\n");
    let pid = fx.state.tasks.pid_of(0).unwrap();

    fx.state.close_connection(conn, false, 0);
    assert!(fx.state.conns.get(conn).is_none());
    // The task still runs with its own duplicate of the socket.
    assert_eq!(fx.state.tasks.pid_of(0), Some(pid));
    assert_eq!(fx.state.tasks.running(), 1);

    fx.state.dispatch(ctl_conn, "kill 0 9");
    assert_eq!(read_line(&mut ctl_client), "[OK]\n");
    let done = fx.done_rx.blocking_recv().unwrap();
    fx.state.finish_task(done);
    assert_eq!(fx.state.tasks.running(), 0);
}
