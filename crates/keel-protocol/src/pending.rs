// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outstanding requests and their deadlines.
//!
//! Entries are keyed by id; deadlines live in a min-heap so the watchdog can
//! always arm for the earliest one. Heap entries are never removed eagerly:
//! an entry whose id is no longer pending (answered, or re-armed) is stale
//! and is skipped when it surfaces.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use keel_core::KeelError;

pub type Reply = oneshot::Sender<Result<Value, KeelError>>;

/// A request sent to the peer and not yet answered.
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub deadline: Instant,
    pub reply: Reply,
}

#[derive(Debug)]
pub struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, PendingRequest>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    /// Allocates the next id and records the request under it.
    pub fn register(&mut self, method: impl Into<String>, deadline: Instant, reply: Reply) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            PendingRequest {
                method: method.into(),
                deadline,
                reply,
            },
        );
        self.deadlines.push(Reverse((deadline, id)));
        self.compact();
        id
    }

    /// Removes the request so it can be settled. `None` if it is already gone.
    pub fn take(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Removes every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(u64, PendingRequest)> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(entry) = self.entries.remove(&id) {
                expired.push((id, entry));
            }
        }
        expired
    }

    /// The earliest deadline still outstanding.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Removes every pending request, in id order.
    pub fn drain(&mut self) -> Vec<(u64, PendingRequest)> {
        self.deadlines.clear();
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Rebuilds the heap once stale entries dominate it.
    fn compact(&mut self) {
        if self.deadlines.len() > 64 && self.deadlines.len() > self.entries.len() * 4 {
            let entries = &self.entries;
            self.deadlines.retain(|Reverse((_, id))| entries.contains_key(id));
        }
    }
}
