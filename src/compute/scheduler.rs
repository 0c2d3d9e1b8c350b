//! The scheduler: routes factory notifications into generations and decides
//! every pairing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::schema::{RunStats, Snapshot, StopReason, WorkerId, WorkerPhase};

use super::evolution::LayoutRng;
use super::exchange::CrossoverOrder;
use super::factory::FactoryHandle;
use super::feed::{BestView, GenerationSink};
use super::generation::{Backlog, Generation};

/// Scheduler limits and probabilities.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub crossover_rate: f64,
    pub notify_timeout: Duration,
    pub iteration_cap: u64,
    pub max_generations: Option<u64>,
}

/// Outcome of a scheduler run.
#[derive(Debug)]
pub struct SchedulerOutcome {
    /// The generation open when the loop ended, if it had any members.
    pub open: Option<Generation>,
    /// The last generation that was published.
    pub last_complete: Option<Generation>,
    pub stats: RunStats,
}

/// Single-threaded owner of the current generation and the backlog.
pub struct Scheduler {
    handles: Vec<Arc<FactoryHandle>>,
    alive: Vec<bool>,
    settings: SchedulerSettings,
    rng: LayoutRng,
    sink: GenerationSink,
    best: BestView,
    current: Option<Generation>,
    last_complete: Option<Generation>,
    backlog: Backlog,
    published: u64,
    crossovers: u64,
    backlogged: u64,
}

impl Scheduler {
    pub fn new(
        handles: Vec<Arc<FactoryHandle>>,
        settings: SchedulerSettings,
        rng: LayoutRng,
        sink: GenerationSink,
        best: BestView,
    ) -> Self {
        let alive = vec![true; handles.len()];
        Self {
            handles,
            alive,
            settings,
            rng,
            sink,
            best,
            current: None,
            last_complete: None,
            backlog: Backlog::new(),
            published: 0,
            crossovers: 0,
            backlogged: 0,
        }
    }

    /// The generation currently accumulating.
    pub fn current(&self) -> Option<&Generation> {
        self.current.as_ref()
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    /// Generations published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Factories still expected to report.
    pub fn live_workers(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    fn handle(&self, worker: WorkerId) -> Option<&Arc<FactoryHandle>> {
        self.handles.get(worker.index())
    }

    fn generation_limit_reached(&self) -> bool {
        self.settings
            .max_generations
            .is_some_and(|max| self.published >= max)
    }

    /// Route one readiness notification.
    pub fn dispatch(&mut self, worker: WorkerId) {
        let Some(handle) = self.handle(worker) else {
            error!("Notification from unknown factory {worker}");
            return;
        };
        let Some(snapshot) = handle.take_snapshot() else {
            error!("{worker} announced readiness without a snapshot");
            return;
        };
        if !self.alive[worker.index()] {
            warn!("Ignoring report from excluded factory {worker}");
            return;
        }

        if self.current.is_none() {
            self.current = Some(Generation::new(1, self.live_workers()));
        }
        self.admit(snapshot);
        self.settle();
    }

    /// Insert into the current generation, or the backlog if the worker
    /// already reported this round, then pair if two are pending.
    fn admit(&mut self, snapshot: Snapshot) {
        let Some(generation) = self.current.as_mut() else {
            self.backlog.push(snapshot);
            return;
        };

        if let Err(early) = generation.insert(snapshot) {
            debug!(
                "{} reported round {} early; backlogged behind generation {}",
                early.worker,
                early.round,
                generation.round()
            );
            self.backlog.push(early);
            self.backlogged += 1;
            return;
        }

        if let Some((a, b)) = generation.pending_pair() {
            generation.consume(a, b);
            self.release_pair(a, b);
        }
    }

    /// Resume a pending pair, arming a crossover with `crossover_rate`.
    fn release_pair(&mut self, a: WorkerId, b: WorkerId) {
        let (order_a, order_b) = if self.rng.chance(self.settings.crossover_rate) {
            let (row, column) = self.rng.crossover_locus();
            debug!("Crossover {a} <-> {b} at ({row}, {column})");
            self.crossovers += 1;
            let (x, y) = CrossoverOrder::pair(row, column);
            (Some(x), Some(y))
        } else {
            (None, None)
        };

        if let Some(handle) = self.handle(a) {
            handle.resume(order_a);
        }
        if let Some(handle) = self.handle(b) {
            handle.resume(order_b);
        }
    }

    /// Roll over every complete generation, up to the generation limit.
    fn settle(&mut self) {
        while !self.generation_limit_reached()
            && self.current.as_ref().is_some_and(Generation::is_complete)
        {
            self.roll_over();
        }
    }

    /// Publish the current generation and start the next one from the backlog.
    fn roll_over(&mut self) {
        let Some(mut finished) = self.current.take() else {
            return;
        };

        // An odd member out never found a partner: let it through unpaired.
        for worker in finished.drain_pending() {
            debug!("{worker} released unpaired at end of generation {}", finished.round());
            if let Some(handle) = self.handle(worker) {
                handle.resume(None);
            }
        }

        let next_round = finished.round() + 1;
        self.publish(finished);
        self.current = Some(Generation::new(next_round, self.live_workers()));

        for snapshot in self.backlog.drain() {
            self.admit(snapshot);
        }
    }

    fn publish(&mut self, generation: Generation) {
        if let Some(best) = generation.best() {
            self.best.offer(best);
        }
        self.published += 1;

        if generation.round() % 100 == 0 {
            info!("{generation}");
        } else {
            debug!("{generation}");
        }

        self.last_complete = Some(generation.clone());
        self.sink.publish(generation);
    }

    /// Exclude factories that exited abnormally.
    ///
    /// Returns the number newly excluded.
    pub fn exclude_failed(&mut self) -> usize {
        let failed: Vec<WorkerId> = self
            .handles
            .iter()
            .filter(|h| self.alive[h.id().index()] && h.phase() == WorkerPhase::Failed)
            .map(|h| h.id())
            .collect();

        for &worker in &failed {
            warn!("Excluding failed factory {worker} from further pairing");
            self.alive[worker.index()] = false;
            self.backlog.discard(worker);
            if let Some(generation) = self.current.as_mut() {
                generation.retire(worker);
            }
        }

        if !failed.is_empty() {
            self.settle();
        }
        failed.len()
    }

    fn log_statuses(&self, waited: Duration) {
        warn!(
            "No factory reported for {waited:?}; generation {}, backlog {}",
            self.current.as_ref().map_or(0, Generation::round),
            self.backlog.len()
        );
        for handle in &self.handles {
            let status = handle.status();
            warn!(
                "  {} is {:?}: fitness {:.5}, round {}",
                status.worker, status.phase, status.fitness, status.round
            );
        }
    }

    /// Drive the engine until a stop condition, then shut the factories down.
    pub fn run(
        mut self,
        notifications: Receiver<WorkerId>,
        stop: Arc<AtomicBool>,
        workers: Vec<JoinHandle<()>>,
    ) -> SchedulerOutcome {
        let start = Instant::now();
        let mut iterations = 0u64;

        let stop_reason = loop {
            if stop.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            if self.generation_limit_reached() {
                break StopReason::MaxGenerations;
            }
            if iterations >= self.settings.iteration_cap {
                break StopReason::IterationCap;
            }
            if self.live_workers() == 0 {
                break StopReason::WorkersExhausted;
            }
            iterations += 1;

            match notifications.recv_timeout(self.settings.notify_timeout) {
                Ok(worker) => {
                    self.exclude_failed();
                    self.dispatch(worker);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.log_statuses(self.settings.notify_timeout);
                    self.exclude_failed();
                }
                Err(RecvTimeoutError::Disconnected) => break StopReason::WorkersExhausted,
            }
        };

        info!(
            "Scheduler stopping after {iterations} iterations ({stop_reason:?}), {} generations published",
            self.published
        );

        // Every factory must see the stop flag before its channel or its
        // exchange partner goes away.
        for handle in &self.handles {
            handle.stop();
        }
        drop(notifications);
        for handle in &self.handles {
            handle.disarm();
        }
        for worker in workers {
            if worker.join().is_err() {
                error!("A factory thread panicked during shutdown");
            }
        }

        let excluded_workers = self.alive.iter().filter(|&&a| !a).count();
        let open = self.current.take().filter(|g| !g.is_empty());

        SchedulerOutcome {
            open,
            last_complete: self.last_complete,
            stats: RunStats {
                generations: self.published,
                iterations,
                crossovers: self.crossovers,
                backlogged: self.backlogged,
                excluded_workers,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                stop_reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::factory::Wakeup;
    use crate::compute::feed::{GenerationFeed, generation_channel};
    use crate::schema::{Backpressure, Layout};

    fn scheduler(k: usize, crossover_rate: f64) -> (Scheduler, Vec<Arc<FactoryHandle>>, GenerationFeed) {
        let handles: Vec<_> = (0..k)
            .map(|i| Arc::new(FactoryHandle::new(WorkerId(i))))
            .collect();
        let (sink, feed) = generation_channel(64, Backpressure::Block);
        let settings = SchedulerSettings {
            crossover_rate,
            notify_timeout: Duration::from_millis(50),
            iteration_cap: 1000,
            max_generations: None,
        };
        let scheduler = Scheduler::new(
            handles.clone(),
            settings,
            LayoutRng::new(99),
            sink,
            BestView::new(),
        );
        (scheduler, handles, feed)
    }

    /// Publish a snapshot the way a factory does before notifying.
    fn report(handle: &FactoryHandle, round: u64, fitness: f64) -> WorkerId {
        handle.publish(Snapshot {
            worker: handle.id(),
            round,
            fitness,
            layout: Layout::empty(),
        });
        handle.id()
    }

    /// Consume a pending resume without blocking; `None` if not resumed.
    fn resumed(handle: &FactoryHandle) -> Option<Option<CrossoverOrder>> {
        handle.resume_pending().then(|| match handle.park() {
            Wakeup::Resume(order) => order,
            Wakeup::Stop => None,
        })
    }

    #[test]
    fn test_round_one_pairs_second_report() {
        let (mut scheduler, handles, feed) = scheduler(2, 0.0);

        scheduler.dispatch(report(&handles[0], 1, 0.2));
        let generation = scheduler.current().unwrap();
        assert_eq!(generation.round(), 1);
        assert_eq!(generation.len(), 1);
        assert_eq!(generation.pending(), &[WorkerId(0)]);
        assert!(!handles[0].resume_pending());

        scheduler.dispatch(report(&handles[1], 1, 0.6));
        assert!(handles[0].resume_pending());
        assert!(handles[1].resume_pending());

        let published = feed.recv().unwrap();
        assert_eq!(published.round(), 1);
        assert_eq!(published.len(), 2);
        assert!(published.pending().is_empty());
        assert_eq!(published.best().unwrap().worker, WorkerId(1));
        assert_eq!(scheduler.current().unwrap().round(), 2);
        assert!(scheduler.current().unwrap().is_empty());
    }

    #[test]
    fn test_forced_crossover_arms_both() {
        let (mut scheduler, handles, _feed) = scheduler(2, 1.0);
        scheduler.dispatch(report(&handles[0], 1, 0.1));
        scheduler.dispatch(report(&handles[1], 1, 0.1));

        let a = resumed(&handles[0]).unwrap().unwrap();
        let b = resumed(&handles[1]).unwrap().unwrap();
        assert_eq!(a.cell(), b.cell());
        assert_eq!(scheduler.crossovers, 1);
    }

    #[test]
    fn test_early_report_goes_to_backlog() {
        let (mut scheduler, handles, feed) = scheduler(4, 0.0);

        scheduler.dispatch(report(&handles[0], 1, 0.1));
        scheduler.dispatch(report(&handles[1], 1, 0.1));
        assert!(resumed(&handles[0]).is_some());
        assert!(resumed(&handles[1]).is_some());

        // F0 finishes round 2 while round 1 still waits for F2 and F3.
        scheduler.dispatch(report(&handles[0], 2, 0.9));
        assert_eq!(scheduler.backlog().len(), 1);
        assert_eq!(scheduler.current().unwrap().len(), 2);
        assert!(!handles[0].resume_pending());

        scheduler.dispatch(report(&handles[2], 1, 0.1));
        scheduler.dispatch(report(&handles[3], 1, 0.1));

        let first = feed.recv().unwrap();
        assert_eq!(first.round(), 1);
        assert!(first.members().iter().all(|s| s.round == 1));

        // The backlogged F0 opens round 2 and waits for a partner.
        let second = scheduler.current().unwrap();
        assert_eq!(second.round(), 2);
        assert_eq!(second.pending(), &[WorkerId(0)]);
        assert!(scheduler.backlog().is_empty());

        // F1's round-2 report pairs with it.
        scheduler.dispatch(report(&handles[1], 2, 0.2));
        assert!(scheduler.current().unwrap().pending().is_empty());
        assert!(handles[0].resume_pending());
        assert!(handles[1].resume_pending());
    }

    #[test]
    fn test_odd_member_released_at_rollover() {
        let (mut scheduler, handles, feed) = scheduler(3, 0.0);
        for handle in &handles {
            scheduler.dispatch(report(handle, 1, 0.1));
        }
        assert_eq!(feed.recv().unwrap().len(), 3);
        assert!(handles.iter().all(|h| h.resume_pending()));
    }

    #[test]
    fn test_single_factory_population() {
        let (mut scheduler, handles, feed) = scheduler(1, 0.0);
        scheduler.dispatch(report(&handles[0], 1, 0.3));
        assert_eq!(feed.recv().unwrap().len(), 1);
        assert!(handles[0].resume_pending());
        scheduler.dispatch(report(&handles[0], 2, 0.3));
        assert_eq!(feed.recv().unwrap().round(), 2);
    }

    #[test]
    fn test_failed_factory_is_excluded() {
        let (mut scheduler, handles, feed) = scheduler(3, 0.0);
        scheduler.dispatch(report(&handles[0], 1, 0.1));
        scheduler.dispatch(report(&handles[1], 1, 0.1));

        handles[2].set_phase(WorkerPhase::Failed);
        assert_eq!(scheduler.exclude_failed(), 1);
        assert_eq!(scheduler.live_workers(), 2);

        let first = feed.recv().unwrap();
        assert_eq!(first.capacity(), 2);
        assert_eq!(scheduler.current().unwrap().capacity(), 2);

        // Already excluded: not counted twice.
        assert_eq!(scheduler.exclude_failed(), 0);
    }

    #[test]
    fn test_run_stops_on_cancel() {
        let (scheduler, _handles, _feed) = scheduler(2, 0.0);
        let (_tx, rx) = crossbeam_channel::bounded(2);
        let stop = Arc::new(AtomicBool::new(true));
        let outcome = scheduler.run(rx, stop, Vec::new());
        assert_eq!(outcome.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.stats.iterations, 0);
        assert!(outcome.open.is_none());
    }

    #[test]
    fn test_run_stops_at_iteration_cap() {
        let (mut scheduler, _handles, _feed) = scheduler(2, 0.0);
        scheduler.settings.iteration_cap = 2;
        let (_tx, rx) = crossbeam_channel::bounded(2);
        let outcome = scheduler.run(rx, Arc::new(AtomicBool::new(false)), Vec::new());
        assert_eq!(outcome.stats.stop_reason, StopReason::IterationCap);
        assert_eq!(outcome.stats.iterations, 2);
    }
}
