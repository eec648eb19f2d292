// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-capacity task slot table.
//!
//! The registry is owned by the event-loop task and never locked. Slots hold
//! terminal records until the allocation cursor comes back around, so late
//! `status` queries can still read exit codes.

use std::net::TcpStream;

use td_core::{summarize_args, TaskState};

/// One task's lifecycle record.
#[derive(Debug, Default)]
struct TaskSlot {
    /// Child process id; `Some` only while the task is live.
    pid: Option<u32>,
    /// Owning connection id.
    conn: usize,
    /// Epoch of the owning connection, guarding against id reuse.
    conn_epoch: u64,
    /// Cached client socket for the final `[EOT]` line.
    stdio: Option<TcpStream>,
    state: TaskState,
    exit_status: i32,
    name: String,
    args: String,
}

/// Point-in-time view of a slot for status replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub slot: usize,
    pub conn: usize,
    pub state: TaskState,
    pub exit_status: i32,
    pub name: String,
    pub args: String,
}

/// Everything the event loop needs to finalize a task.
#[derive(Debug)]
pub struct FinishedTask {
    pub slot: usize,
    pub conn: usize,
    pub conn_epoch: u64,
    pub exit_status: i32,
    /// Cached client socket, surrendered for the `[EOT]` write.
    pub stdio: Option<TcpStream>,
}

/// Fixed-size table of task slots with a rotating allocation cursor.
pub struct TaskRegistry {
    slots: Vec<TaskSlot>,
    cursor: usize,
    running: usize,
}

impl TaskRegistry {
    /// Create a table with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| TaskSlot::default()).collect(),
            cursor: capacity - 1,
            running: 0,
        }
    }

    /// Allocate the next free slot round-robin.
    ///
    /// The cursor keeps rotating across allocations so a freshly freed slot
    /// is passed over while other free slots remain, preserving recent
    /// completion records. Slots with a live pid are never reused.
    pub fn allocate(
        &mut self,
        conn: usize,
        conn_epoch: u64,
        name: &str,
        args: &[String],
    ) -> Option<usize> {
        for _ in 0..self.slots.len() {
            self.cursor = (self.cursor + 1) % self.slots.len();
            if self.slots[self.cursor].pid.is_none() {
                self.slots[self.cursor] = TaskSlot {
                    pid: None,
                    conn,
                    conn_epoch,
                    stdio: None,
                    state: TaskState::Init,
                    exit_status: 0,
                    name: name.to_string(),
                    args: summarize_args(args),
                };
                return Some(self.cursor);
            }
        }
        None
    }

    /// Cache the client socket a slot's `[EOT]` line will be written to.
    pub fn attach_stdout(&mut self, slot: usize, stream: TcpStream) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.stdio = Some(stream);
        }
    }

    /// Record a successful spawn: the slot owns a running child.
    pub fn mark_running(&mut self, slot: usize, pid: u32) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.pid = Some(pid);
            entry.state = TaskState::Running;
            self.running += 1;
        }
    }

    /// Move a slot to a terminal state and free its pid.
    ///
    /// Returns the routing data for the `[EOT]` line. The record itself
    /// stays in place until the cursor reallocates the slot.
    pub fn finish(&mut self, slot: usize, state: TaskState, exit_status: i32) -> FinishedTask {
        let entry = &mut self.slots[slot];
        if entry.state == TaskState::Running {
            self.running -= 1;
        }
        entry.pid = None;
        entry.state = state;
        entry.exit_status = exit_status;
        FinishedTask {
            slot,
            conn: entry.conn,
            conn_epoch: entry.conn_epoch,
            exit_status,
            stdio: entry.stdio.take(),
        }
    }

    /// Find the slot owning a child pid.
    pub fn find_by_pid(&self, pid: u32) -> Option<usize> {
        self.slots.iter().position(|slot| slot.pid == Some(pid))
    }

    /// Pid of the task in a slot, if it is live.
    pub fn pid_of(&self, slot: usize) -> Option<u32> {
        self.slots.get(slot).and_then(|entry| entry.pid)
    }

    /// Number of running tasks (the status `ntasks` counter).
    pub fn running(&self) -> usize {
        self.running
    }

    /// Number of running tasks owned by one connection id.
    pub fn running_for_conn(&self, conn: usize) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.pid.is_some() && slot.conn == conn)
            .count()
    }

    /// Pids of live tasks bound to a specific connection incarnation.
    pub fn live_for_conn(&self, conn: usize, conn_epoch: u64) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|slot| slot.conn == conn && slot.conn_epoch == conn_epoch)
            .filter_map(|slot| slot.pid)
            .collect()
    }

    /// Pids of every live task.
    pub fn live_pids(&self) -> Vec<u32> {
        self.slots.iter().filter_map(|slot| slot.pid).collect()
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot one slot (any in-range slot, used or not).
    pub fn snapshot(&self, slot: usize) -> Option<TaskSnapshot> {
        self.slots.get(slot).map(|entry| TaskSnapshot {
            slot,
            conn: entry.conn,
            state: entry.state,
            exit_status: entry.exit_status,
            name: entry.name.clone(),
            args: entry.args.clone(),
        })
    }

    /// Snapshots of every slot that has ever held a task.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        (0..self.slots.len())
            .filter(|&slot| self.slots[slot].state != TaskState::Free)
            .filter_map(|slot| self.snapshot(slot))
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
