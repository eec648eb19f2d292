// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request grammar: `VERB [SP ARG]* (LF | NUL)`.

use thiserror::Error;

/// A single client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Launch a task; the connection carries its stdout until `[EOT]`.
    Execute { name: String, args: Vec<String> },
    /// No operation, no reply.
    Nop,
    /// Status of one slot, or of the whole daemon when `slot` is absent.
    Status { slot: Option<usize> },
    /// Signal a task (SIGHUP when no signal is given).
    Kill { slot: usize, signal: Option<i32> },
    /// Signal SIGHUP to every running task.
    KillAll,
    /// Number of open client connections.
    Connections,
    /// Number of running tasks, optionally for one connection.
    Tasks { conn: Option<usize> },
    /// Close this connection; running tasks are left alone.
    Close,
    /// Stop the daemon; refused while tasks run unless `now`.
    Shutdown { now: bool },
}

/// Request parse failures, reported to the client as `[ERR]` lines.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("task name missing in exec request")]
    MissingTaskName,

    #[error("missing task number")]
    MissingTaskNumber,

    #[error("invalid task number ({0})")]
    BadTaskNumber(String),

    #[error("invalid connection number ({0})")]
    BadConnNumber(String),

    #[error("invalid signal ({0})")]
    BadSignal(String),

    #[error("unknown request: {0}")]
    UnknownRequest(String),
}

/// Verb table: full name and the shortest accepted prefix length.
const VERBS: &[(&str, usize)] = &[
    ("execute", 4),
    ("nop", 3),
    ("status", 6),
    ("kill", 4),
    ("killall", 7),
    ("nconnections", 5),
    ("ntasks", 6),
    ("close", 5),
    ("shutdown", 8),
];

/// Resolve a request token to its full verb name.
///
/// A token matches a verb when it is a prefix of the full name at least as
/// long as the verb's minimum. An ambiguous token matches nothing.
fn match_verb(token: &str) -> Option<&'static str> {
    let mut found = None;
    for (full, min) in VERBS {
        if token.len() >= *min && full.starts_with(token) {
            if found.is_some() {
                return None;
            }
            found = Some(*full);
        }
    }
    found
}

/// Parse one request line (terminators already stripped or not — both fine).
pub fn parse_request(line: &str) -> Result<Request, ParseError> {
    let line = line.trim_matches(|c| c == '\n' || c == '\r' || c == '\0');
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Err(ParseError::Empty);
    };

    let Some(verb) = match_verb(verb) else {
        return Err(ParseError::UnknownRequest(verb.to_string()));
    };

    match verb {
        "execute" => {
            let Some(name) = tokens.next() else {
                return Err(ParseError::MissingTaskName);
            };
            Ok(Request::Execute {
                name: name.to_string(),
                args: tokens.map(str::to_string).collect(),
            })
        }
        "nop" => Ok(Request::Nop),
        "status" => {
            let slot = match tokens.next() {
                None => None,
                Some(tok) => Some(
                    tok.parse()
                        .map_err(|_| ParseError::BadTaskNumber(tok.to_string()))?,
                ),
            };
            Ok(Request::Status { slot })
        }
        "kill" => {
            let Some(tok) = tokens.next() else {
                return Err(ParseError::MissingTaskNumber);
            };
            let slot = tok
                .parse()
                .map_err(|_| ParseError::BadTaskNumber(tok.to_string()))?;
            let signal = match tokens.next() {
                None => None,
                Some(tok) => Some(
                    tok.parse()
                        .map_err(|_| ParseError::BadSignal(tok.to_string()))?,
                ),
            };
            Ok(Request::Kill { slot, signal })
        }
        "killall" => Ok(Request::KillAll),
        "nconnections" => Ok(Request::Connections),
        "ntasks" => {
            let conn = match tokens.next() {
                None => None,
                Some(tok) => Some(
                    tok.parse()
                        .map_err(|_| ParseError::BadConnNumber(tok.to_string()))?,
                ),
            };
            Ok(Request::Tasks { conn })
        }
        "close" => Ok(Request::Close),
        "shutdown" => Ok(Request::Shutdown {
            now: tokens.next() == Some("now"),
        }),
        _ => Err(ParseError::UnknownRequest(verb.to_string())),
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
