//! Run-time status and result types for an engine run.

use serde::{Deserialize, Serialize};

use super::WorkerId;

/// Observable phase of a factory thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WorkerPhase {
    /// Spawned, has not produced a layout yet.
    #[default]
    Starting,
    /// Building its first random layout.
    Generating,
    /// Crossover and mutation in progress.
    Evolving,
    /// Snapshot published, notification being sent.
    Reporting,
    /// Parked until the scheduler resumes it.
    Paused,
    /// Exited after a stop request.
    Stopped,
    /// Exited abnormally; excluded from further pairing.
    Failed,
}

impl WorkerPhase {
    /// Whether the factory thread has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Stopped | WorkerPhase::Failed)
    }
}

/// Point-in-time status of one factory, used for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker: WorkerId,
    pub phase: WorkerPhase,
    /// Fitness of the last reported layout.
    pub fitness: f64,
    /// The factory's own round counter.
    pub round: u64,
}

/// Statistics from an engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Generations published on the outgoing channel.
    pub generations: u64,
    /// Scheduler loop iterations.
    pub iterations: u64,
    /// Pairings that performed a crossover.
    pub crossovers: u64,
    /// Snapshots that went through the backlog.
    pub backlogged: u64,
    /// Factories excluded after failing.
    pub excluded_workers: usize,
    /// Wall-clock time (in seconds).
    pub elapsed_seconds: f64,
    /// Reason the scheduler stopped.
    pub stop_reason: StopReason,
}

/// Reason the scheduler loop ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Iteration safety bound reached.
    IterationCap,
    /// Configured generation count published.
    MaxGenerations,
    /// Stop handle triggered.
    Cancelled,
    /// No live factory left to report.
    WorkersExhausted,
}
