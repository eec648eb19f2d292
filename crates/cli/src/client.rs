// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client mode: control + task-exec connections to a remote daemon.
//!
//! The control connection carries status and management requests; the task
//! connection is reserved for `exec` requests and the task output streams
//! they produce. Running more than one task at a time only needs more task
//! connections.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::net::TcpStream;

use td_wire::reply;

/// Compose the exec request line for a task and its arguments.
fn exec_line(task: &str, args: &[String]) -> String {
    let mut line = format!("exec {task}");
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push('\n');
    line
}

/// Route an interactive input line: `exec` traffic goes to the task
/// connection, everything else to the control connection.
fn is_task_request(line: &str) -> bool {
    line.starts_with("exec")
}

async fn connect(host: &str, port: u16, verbose: bool) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("cannot connect to {host}:{port}"))?;
    if verbose {
        eprintln!("socket opened for {host}:{port}");
    }
    Ok(stream)
}

async fn prompt(stdout: &mut Stdout) -> Result<()> {
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;
    Ok(())
}

/// Run the client until the task completes (single-task mode) or the user
/// leaves the REPL with `exit`/`quit`.
pub async fn run(
    host: &str,
    port: u16,
    task: Option<&str>,
    args: &[String],
    verbose: bool,
) -> Result<()> {
    let mut control = connect(host, port, verbose).await?;
    let mut task_conn = connect(host, port, verbose).await?;

    if let Some(name) = task {
        task_conn
            .write_all(exec_line(name, args).as_bytes())
            .await
            .context("task submission failed")?;
    }
    let interactive = task.is_none();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut ctl_buf = [0u8; 1024];
    let mut task_buf = [0u8; 1024];
    // Tracks whether the task stream sits on a line boundary, where an
    // [EOT] token is meaningful.
    let mut at_line_start = true;

    if interactive {
        prompt(&mut stdout).await?;
    }

    loop {
        tokio::select! {
            read = control.read(&mut ctl_buf) => {
                let n = read.context("control connection read failed")?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&ctl_buf[..n]).await?;
                stdout.flush().await?;
                if interactive && reply::starts_eot(&ctl_buf[..n]) {
                    prompt(&mut stdout).await?;
                }
            }

            read = task_conn.read(&mut task_buf) => {
                let n = read.context("task connection read failed")?;
                if n == 0 {
                    break;
                }
                let chunk = &task_buf[..n];
                let eot = reply::find_eot(chunk, at_line_start);
                if let Some(pos) = eot {
                    if !interactive {
                        // Stream complete; the [EOT] line itself stays ours.
                        stdout.write_all(&chunk[..pos]).await?;
                        stdout.flush().await?;
                        break;
                    }
                }
                stdout.write_all(chunk).await?;
                stdout.flush().await?;
                at_line_start = chunk.ends_with(b"\n") || chunk.ends_with(b"\0");
                if interactive && eot.is_some() {
                    prompt(&mut stdout).await?;
                }
            }

            line = stdin.next_line(), if interactive => {
                let Some(line) = line.context("stdin read failed")? else {
                    break;
                };
                let line = line.trim_end();
                if line.is_empty() {
                    prompt(&mut stdout).await?;
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                let framed = format!("{line}\n");
                if is_task_request(line) {
                    task_conn.write_all(framed.as_bytes()).await?;
                } else {
                    control.write_all(framed.as_bytes()).await?;
                }
            }
        }
    }

    // Release both connections before leaving.
    let _ = task_conn.write_all(b"close\n").await;
    let _ = control.write_all(b"close\n").await;
    Ok(())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
