//! Generation bookkeeping: the snapshots of one round and the backlog of
//! early reports for the next.

use std::collections::VecDeque;

use log::error;
use serde::{Deserialize, Serialize};

use crate::schema::{Snapshot, WorkerId};

/// Snapshots collected for one round across the population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    round: u64,
    capacity: usize,
    members: Vec<Snapshot>,
    /// Members not yet released through a pairing decision.
    pending: Vec<WorkerId>,
    best: Option<Snapshot>,
}

impl Generation {
    /// An empty generation expecting `capacity` members.
    pub fn new(round: u64, capacity: usize) -> Self {
        Self {
            round,
            capacity,
            members: Vec::with_capacity(capacity),
            pending: Vec::with_capacity(2),
            best: None,
        }
    }

    #[inline]
    pub fn round(&self) -> u64 {
        self.round
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Snapshot] {
        &self.members
    }

    pub fn pending(&self) -> &[WorkerId] {
        &self.pending
    }

    /// Highest-fitness member so far. The earliest wins ties.
    pub fn best(&self) -> Option<&Snapshot> {
        self.best.as_ref()
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.members.iter().any(|s| s.worker == worker)
    }

    /// Add a member and mark it pending.
    ///
    /// A snapshot from a worker that is already a member belongs to a later
    /// round and is handed back unchanged.
    pub fn insert(&mut self, snapshot: Snapshot) -> Result<(), Snapshot> {
        if self.contains(snapshot.worker) {
            return Err(snapshot);
        }

        let better = self
            .best
            .as_ref()
            .is_none_or(|best| snapshot.fitness > best.fitness);
        if better {
            self.best = Some(snapshot.clone());
        }

        self.pending.push(snapshot.worker);
        self.members.push(snapshot);
        Ok(())
    }

    /// Whether two members are waiting for a pairing decision.
    #[inline]
    pub fn pair_ready(&self) -> bool {
        self.pending.len() == 2
    }

    /// The two pending members, oldest first, when a pair is ready.
    pub fn pending_pair(&self) -> Option<(WorkerId, WorkerId)> {
        match self.pending.as_slice() {
            &[a, b] => Some((a, b)),
            _ => None,
        }
    }

    /// Remove both workers from the pending set once they were released.
    pub fn consume(&mut self, a: WorkerId, b: WorkerId) {
        self.pending.retain(|&w| w != a && w != b);
    }

    /// Remove and return every pending member.
    pub fn drain_pending(&mut self) -> Vec<WorkerId> {
        std::mem::take(&mut self.pending)
    }

    /// Whether every expected member has reported.
    pub fn is_complete(&self) -> bool {
        if self.members.len() > self.capacity {
            error!(
                "Generation {} is over its size limit: {} members for capacity {}",
                self.round,
                self.members.len(),
                self.capacity
            );
        }
        self.members.len() == self.capacity
    }

    /// Stop expecting a worker that will never report again.
    ///
    /// A worker that already reported stays a member; otherwise the capacity
    /// shrinks by one. Returns whether the worker was pending.
    pub fn retire(&mut self, worker: WorkerId) -> bool {
        let was_pending = self.pending.contains(&worker);
        self.pending.retain(|&w| w != worker);
        if !self.contains(worker) {
            self.capacity = self.capacity.saturating_sub(1);
        }
        was_pending
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.best {
            Some(best) => write!(
                f,
                "Generation {}: {}/{} members, best {:.5} ({})",
                self.round,
                self.members.len(),
                self.capacity,
                best.fitness,
                best.worker
            ),
            None => write!(
                f,
                "Generation {}: {}/{} members",
                self.round,
                self.members.len(),
                self.capacity
            ),
        }
    }
}

/// Snapshots reported into a round that has not started yet, in arrival order.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: VecDeque<Snapshot>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.entries.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, worker: WorkerId) -> bool {
        self.entries.iter().any(|s| s.worker == worker)
    }

    /// Take every entry, oldest first.
    pub fn drain(&mut self) -> Vec<Snapshot> {
        self.entries.drain(..).collect()
    }

    /// Drop the entries of one worker. Returns how many were removed.
    pub fn discard(&mut self, worker: WorkerId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|s| s.worker != worker);
        before - self.entries.len()
    }
}
