//! Outgoing side of the engine: completed generations and the running best.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::warn;

use crate::schema::{Backpressure, Snapshot};

use super::generation::Generation;

/// Create a linked sink/feed pair.
pub fn generation_channel(capacity: usize, policy: Backpressure) -> (GenerationSink, GenerationFeed) {
    let (tx, rx) = bounded(capacity.max(1));
    let evict = match policy {
        Backpressure::Block => None,
        Backpressure::DropOldest => Some(rx.clone()),
    };
    (
        GenerationSink {
            tx,
            evict,
            detached: false,
        },
        GenerationFeed { rx },
    )
}

/// Scheduler-side end of the generation channel.
#[derive(Debug)]
pub struct GenerationSink {
    tx: Sender<Generation>,
    /// Receiver clone used to evict the oldest entry under `DropOldest`.
    evict: Option<Receiver<Generation>>,
    detached: bool,
}

impl GenerationSink {
    /// Publish a completed generation according to the backpressure policy.
    ///
    /// Returns `false` if the consumer is gone.
    pub fn publish(&mut self, generation: Generation) -> bool {
        if self.detached {
            return false;
        }

        let delivered = match &self.evict {
            None => self.tx.send(generation).is_ok(),
            Some(evict) => {
                let mut pending = generation;
                loop {
                    match self.tx.try_send(pending) {
                        Ok(()) => break true,
                        Err(TrySendError::Full(back)) => {
                            let _ = evict.try_recv();
                            pending = back;
                        }
                        Err(TrySendError::Disconnected(_)) => break false,
                    }
                }
            }
        };

        if !delivered {
            warn!("Generation consumer disconnected; further generations are discarded");
            self.detached = true;
        }
        delivered
    }
}

/// Consumer-side end of the generation channel.
#[derive(Debug, Clone)]
pub struct GenerationFeed {
    rx: Receiver<Generation>,
}

impl GenerationFeed {
    /// Block until the next generation, or `None` once the engine finished.
    pub fn recv(&self) -> Option<Generation> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next generation.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Generation, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Drain everything queued and keep only the newest generation.
    pub fn latest(&self) -> Option<Generation> {
        self.rx.try_iter().last()
    }

    /// Number of generations waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Blocking iterator that ends when the engine finishes.
    pub fn iter(&self) -> impl Iterator<Item = Generation> + '_ {
        self.rx.iter()
    }
}

/// Read-only view of the best snapshot across completed generations.
#[derive(Debug, Clone, Default)]
pub struct BestView {
    best: Arc<Mutex<Option<Snapshot>>>,
}

impl BestView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current best snapshot, if any generation completed.
    pub fn get(&self) -> Option<Snapshot> {
        self.best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the best if `candidate` is strictly fitter. Returns whether it did.
    pub(crate) fn offer(&self, candidate: &Snapshot) -> bool {
        let mut best = self.best.lock().unwrap_or_else(PoisonError::into_inner);
        if best.as_ref().is_none_or(|b| candidate.fitness > b.fitness) {
            *best = Some(candidate.clone());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Layout, WorkerId};

    fn generation(round: u64) -> Generation {
        Generation::new(round, 1)
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (mut sink, feed) = generation_channel(2, Backpressure::DropOldest);
        for round in 1..=5 {
            assert!(sink.publish(generation(round)));
        }
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.recv().unwrap().round(), 4);
        assert_eq!(feed.recv().unwrap().round(), 5);
    }

    #[test]
    fn test_latest_drains_queue() {
        let (mut sink, feed) = generation_channel(8, Backpressure::Block);
        for round in 1..=3 {
            sink.publish(generation(round));
        }
        assert_eq!(feed.latest().unwrap().round(), 3);
        assert!(feed.is_empty());
        assert!(feed.latest().is_none());
    }

    #[test]
    fn test_detaches_when_consumer_dropped() {
        let (mut sink, feed) = generation_channel(1, Backpressure::Block);
        drop(feed);
        assert!(!sink.publish(generation(1)));
        assert!(!sink.publish(generation(2)));
    }

    #[test]
    fn test_feed_ends_with_sink() {
        let (mut sink, feed) = generation_channel(4, Backpressure::Block);
        sink.publish(generation(1));
        drop(sink);
        let rounds: Vec<_> = feed.iter().map(|g| g.round()).collect();
        assert_eq!(rounds, vec![1]);
    }

    #[test]
    fn test_best_view_strictly_better() {
        let view = BestView::new();
        let snap = |worker, fitness| Snapshot {
            worker: WorkerId(worker),
            round: 1,
            fitness,
            layout: Layout::empty(),
        };

        assert!(view.get().is_none());
        assert!(view.offer(&snap(0, 0.4)));
        assert!(!view.offer(&snap(1, 0.4)));
        assert!(view.offer(&snap(2, 0.6)));
        assert_eq!(view.get().unwrap().worker, WorkerId(2));
    }
}
