// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reply framing: `[OK]`, `[ERR]`, and `[EOT]` lines.
//!
//! Every reply line carries one of the three leading tokens; raw task output
//! carries none. `[EOT]` at the start of a line is the only marker clients
//! have for the end of a task's stream, so the scanning helpers here are
//! shared between the daemon and the client.

/// Leading token of success replies.
pub const OK_TOKEN: &str = "[OK]";

/// Leading token of error replies.
pub const ERR_TOKEN: &str = "[ERR]";

/// Leading token of end-of-task lines.
pub const EOT_TOKEN: &str = "[EOT]";

/// A success line: `[OK] detail\n`, or bare `[OK]\n` for an empty detail.
pub fn ok(detail: &str) -> String {
    if detail.is_empty() {
        format!("{OK_TOKEN}\n")
    } else {
        format!("{OK_TOKEN} {detail}\n")
    }
}

/// An error line: `[ERR] detail\n`.
pub fn err(detail: &str) -> String {
    format!("{ERR_TOKEN} {detail}\n")
}

/// The end-of-task line for a slot: `[EOT] slot exit\n`.
pub fn eot(slot: usize, exit_status: i32) -> String {
    format!("{EOT_TOKEN} {slot} {exit_status}\n")
}

/// The bare end-of-listing line used by multi-line status replies.
pub fn eot_bare() -> String {
    format!("{EOT_TOKEN}\n")
}

/// Whether a chunk opens with the end-of-task token.
pub fn starts_eot(chunk: &[u8]) -> bool {
    chunk.starts_with(EOT_TOKEN.as_bytes())
}

/// Locate an `[EOT]` line inside a chunk of stream data.
///
/// `at_line_start` says whether the chunk begins on a line boundary. Returns
/// the offset of the `[` that opens the token; bytes before it are ordinary
/// task output.
pub fn find_eot(chunk: &[u8], at_line_start: bool) -> Option<usize> {
    if at_line_start && starts_eot(chunk) {
        return Some(0);
    }
    let token = EOT_TOKEN.as_bytes();
    chunk
        .windows(token.len() + 1)
        .position(|w| w[0] == b'\n' && &w[1..] == token)
        .map(|pos| pos + 1)
}

#[cfg(test)]
#[path = "reply_tests.rs"]
mod tests;
