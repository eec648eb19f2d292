// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection request framing.
//!
//! Each connection gets one named reader thread owning a clone of the
//! socket. The socket stays in blocking mode — its open file description
//! doubles as a child's stdout during task execution, and `O_NONBLOCK`
//! would travel with it — so reads happen off the event loop and complete
//! frames are forwarded over the event channel.

use std::io::Read;
use std::net::TcpStream;

use tokio::sync::mpsc;
use tracing::trace;

use td_wire::MAX_REQUEST;

/// Events forwarded from connection readers to the event loop.
#[derive(Debug)]
pub enum Event {
    /// A complete request frame arrived on a connection.
    Request { conn: usize, epoch: u64, line: String },
    /// The peer closed the connection (or its socket failed).
    Disconnected { conn: usize, epoch: u64 },
}

/// Split complete request frames out of an accumulation buffer.
///
/// Frames end at `\n` or NUL; a buffer that reaches the request size cap
/// without a terminator is flushed as-is. Incomplete tails stay in the
/// buffer for the next read.
fn take_frames(buf: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();
    loop {
        match buf.iter().position(|&b| b == b'\n' || b == 0) {
            Some(pos) => {
                let rest = buf.split_off(pos + 1);
                let mut frame = std::mem::replace(buf, rest);
                frame.truncate(pos);
                frames.push(String::from_utf8_lossy(&frame).into_owned());
            }
            None if buf.len() >= MAX_REQUEST => {
                let frame = std::mem::take(buf);
                frames.push(String::from_utf8_lossy(&frame).into_owned());
            }
            None => break,
        }
    }
    frames
}

/// Spawn the reader thread for one connection.
pub fn spawn(
    conn: usize,
    epoch: u64,
    stream: TcpStream,
    tx: mpsc::Sender<Event>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("conn-reader-{conn}"))
        .spawn(move || read_loop(conn, epoch, stream, tx))?;
    Ok(())
}

fn read_loop(conn: usize, epoch: u64, mut stream: TcpStream, tx: mpsc::Sender<Event>) {
    let mut acc: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                acc.extend_from_slice(&chunk[..n]);
                for line in take_frames(&mut acc) {
                    if tx.blocking_send(Event::Request { conn, epoch, line }).is_err() {
                        // Event loop is gone; nothing left to report to.
                        return;
                    }
                }
            }
            Err(e) => {
                trace!(conn, error = %e, "connection read failed");
                break;
            }
        }
    }
    let _ = tx.blocking_send(Event::Disconnected { conn, epoch });
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
