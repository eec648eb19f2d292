// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration, startup, and logging.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use td_core::limits::{MAX_CONNECTIONS, MAX_DIRS, MAX_TASKS};

/// Daemon configuration assembled from flags and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port; 0 asks the OS for a free port.
    pub port: u16,
    /// Ordered task search path.
    pub search_path: Vec<PathBuf>,
    /// Connection table capacity.
    pub max_clients: usize,
    /// Task table capacity.
    pub max_tasks: usize,
    /// Diagnostic log destination; stderr when absent.
    pub logfile: Option<PathBuf>,
    /// Verbosity level from repeated `-v` flags.
    pub verbose: u8,
}

/// Startup failures. Each maps to a documented process exit code.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("maximum search directories exceeded ({0} > {MAX_DIRS})")]
    TooManyDirs(usize),

    #[error("invalid logfile path: {0}")]
    BadLogfile(PathBuf),

    #[error("maximum client connections exceeded ({0}, limit {MAX_CONNECTIONS})")]
    MaxClientsExceeded(usize),

    #[error("maximum executing tasks exceeded ({0}, limit {MAX_TASKS})")]
    MaxTasksExceeded(usize),

    #[error("cannot listen on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("cannot fork daemon process: {0}")]
    Daemonize(std::io::Error),

    #[error("daemon process exited during startup ({0})")]
    DaemonExited(std::process::ExitStatus),
}

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::TooManyDirs(_) | StartupError::BadLogfile(_) => 1,
            StartupError::Bind { .. } => 2,
            StartupError::MaxClientsExceeded(_) => 3,
            StartupError::MaxTasksExceeded(_) => 4,
            StartupError::Daemonize(_) => 6,
            StartupError::DaemonExited(status) => status.code().unwrap_or(6),
        }
    }
}

impl Config {
    /// Reject configurations the fixed tables cannot honor.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.search_path.len() > MAX_DIRS {
            return Err(StartupError::TooManyDirs(self.search_path.len()));
        }
        if self.max_clients == 0 || self.max_clients > MAX_CONNECTIONS {
            return Err(StartupError::MaxClientsExceeded(self.max_clients));
        }
        if self.max_tasks == 0 || self.max_tasks > MAX_TASKS {
            return Err(StartupError::MaxTasksExceeded(self.max_tasks));
        }
        Ok(())
    }
}

/// Bind the service socket for incoming client connections.
pub async fn bind(config: &Config) -> Result<TcpListener, StartupError> {
    TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|source| StartupError::Bind {
            port: config.port,
            source,
        })
}

/// Re-exec the daemon detached into the background.
///
/// The child runs the same command line minus the daemon flag, in its own
/// process group, with stderr kept so diagnostics still reach the terminal
/// or logfile. The parent holds a pipe to the child's stdout and relays the
/// `READY <port>` handshake before exiting, so whatever started us still
/// learns the bound port (and sees a bind failure as a nonzero exit).
pub fn daemonize() -> Result<(), StartupError> {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().map_err(StartupError::Daemonize)?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "-s" && arg != "--daemon")
        .collect();

    let mut child = std::process::Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .process_group(0)
        .spawn()
        .map_err(StartupError::Daemonize)?;

    let Some(child_stdout) = child.stdout.take() else {
        return Err(StartupError::Daemonize(std::io::Error::other(
            "no pipe to daemon child",
        )));
    };

    let mut ready = String::new();
    BufReader::new(child_stdout)
        .read_line(&mut ready)
        .map_err(StartupError::Daemonize)?;
    if ready.is_empty() {
        // The child died before binding; surface its exit status.
        let status = child.wait().map_err(StartupError::Daemonize)?;
        return Err(StartupError::DaemonExited(status));
    }

    let mut stdout = std::io::stdout();
    stdout
        .write_all(ready.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(StartupError::Daemonize)?;
    Ok(())
}

/// Set up tracing output.
///
/// `--verbose` picks the default level (info / debug / trace), `TD_LOG`
/// overrides it with a full filter expression, and `--logfile` redirects
/// output to an append-mode file through a non-blocking writer. The returned
/// guard must live as long as the daemon so buffered lines are flushed.
pub fn setup_logging(
    config: &Config,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, StartupError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = match config.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = crate::env::log_filter()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default));

    match &config.logfile {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .ok_or_else(|| StartupError::BadLogfile(path.clone()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
            info!("tasking daemon logging started");
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
