// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-capacity client connection table.
//!
//! Connections are identified by stable small integers for their lifetime.
//! Every entry carries an epoch drawn from a table-wide counter, so a task
//! that outlives its connection can never touch a newer connection that
//! happens to reuse the same id.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{Shutdown, TcpStream};

use tracing::debug;

use td_wire::reply;

/// One connected client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    /// Reserved for a running task's stdout.
    pub busy: bool,
    /// Incarnation marker for this id.
    pub epoch: u64,
    /// Requests that arrived while the connection was busy.
    pub pending: VecDeque<String>,
}

impl Connection {
    /// Duplicate the socket handle (for a child's stdout or an `[EOT]` cache).
    pub fn try_clone(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }
}

/// Fixed-size table of client connections.
pub struct ConnTable {
    conns: Vec<Option<Connection>>,
    next_epoch: u64,
    open: usize,
}

impl ConnTable {
    /// Create a table with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            conns: (0..capacity.max(1)).map(|_| None).collect(),
            next_epoch: 0,
            open: 0,
        }
    }

    /// Register an accepted socket.
    ///
    /// Returns the connection id and epoch, or refuses the socket with an
    /// error line and closes it when the table is full.
    pub fn add(&mut self, stream: TcpStream) -> Option<(usize, u64)> {
        match self.conns.iter().position(Option::is_none) {
            Some(id) => {
                self.next_epoch += 1;
                let epoch = self.next_epoch;
                self.conns[id] = Some(Connection {
                    stream,
                    busy: false,
                    epoch,
                    pending: VecDeque::new(),
                });
                self.open += 1;
                Some((id, epoch))
            }
            None => {
                let mut stream = stream;
                let _ = stream.write_all(reply::err("too many client connections").as_bytes());
                let _ = stream.shutdown(Shutdown::Both);
                None
            }
        }
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.conns.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.conns.get_mut(id).and_then(Option::as_mut)
    }

    /// Write a reply on a connection.
    ///
    /// An unknown id is a no-op; an I/O error tells the caller to drop the
    /// connection. Short reply lines fit the socket send buffer, so this
    /// does not stall the event loop.
    pub fn send(&mut self, id: usize, data: &str) -> std::io::Result<()> {
        match self.get_mut(id) {
            Some(conn) => conn.stream.write_all(data.as_bytes()),
            None => Ok(()),
        }
    }

    /// Close a connection and free its slot.
    ///
    /// Running tasks keep their own duplicate of the socket; only the
    /// daemon's handle goes away. The reader thread wakes with EOF once the
    /// socket is shut down.
    pub fn close(&mut self, id: usize) -> bool {
        match self.conns.get_mut(id).and_then(Option::take) {
            Some(conn) => {
                let _ = conn.stream.shutdown(Shutdown::Both);
                self.open -= 1;
                debug!(conn = id, "client connection closed");
                true
            }
            None => false,
        }
    }

    /// Number of open connections.
    pub fn open(&self) -> usize {
        self.open
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.conns.len()
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
