//! Factory threads: one per population member.
//!
//! A [`Factory`] owns its layout and runs evolve → report → park in a loop.
//! The scheduler talks to it only through its shared [`FactoryHandle`]:
//! it can take the published snapshot, resume the factory (optionally armed
//! with a crossover) and ask it to stop.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error};

use crate::schema::{Layout, Snapshot, WorkerId, WorkerPhase, WorkerStatus};

use super::evolution::{LayoutRng, Scored, StepParams, fitness};
use super::exchange::{CrossoverOrder, ExchangeError};

/// Errors that end a factory's loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Crossover failed: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("Scheduler stopped receiving notifications")]
    SchedulerGone,
}

/// What woke a parked factory.
#[derive(Debug)]
pub enum Wakeup {
    /// Continue with the next round, performing the crossover if armed.
    Resume(Option<CrossoverOrder>),
    /// Exit the loop.
    Stop,
}

#[derive(Debug, Default)]
struct GateState {
    phase: WorkerPhase,
    /// Level-triggered resume permit; survives until the factory parks.
    permit: bool,
    armed: Option<CrossoverOrder>,
    stop: bool,
    snapshot: Option<Snapshot>,
    fitness: f64,
    round: u64,
}

/// Shared control surface of one factory.
#[derive(Debug)]
pub struct FactoryHandle {
    id: WorkerId,
    state: Mutex<GateState>,
    wake: Condvar,
}

impl FactoryHandle {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: Mutex::new(GateState::default()),
            wake: Condvar::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> WorkerPhase {
        self.lock().phase
    }

    pub fn status(&self) -> WorkerStatus {
        let state = self.lock();
        WorkerStatus {
            worker: self.id,
            phase: state.phase,
            fitness: state.fitness,
            round: state.round,
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.lock().stop
    }

    /// Whether a resume is waiting to be consumed by the next park.
    pub fn resume_pending(&self) -> bool {
        self.lock().permit
    }

    /// Take the snapshot published with the factory's last report.
    pub fn take_snapshot(&self) -> Option<Snapshot> {
        self.lock().snapshot.take()
    }

    /// Let the factory continue, optionally armed with a crossover.
    ///
    /// Safe to call before the factory has parked: the permit is kept until
    /// the next park consumes it.
    pub fn resume(&self, crossover: Option<CrossoverOrder>) {
        let mut state = self.lock();
        state.armed = crossover;
        state.permit = true;
        self.wake.notify_all();
    }

    /// Request a stop and release the factory if parked.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.stop = true;
        self.wake.notify_all();
    }

    /// Drop an order the factory will never consume, releasing its partner.
    ///
    /// Call only after every factory was asked to stop, so the partner's
    /// failed exchange is seen as part of the shutdown.
    pub fn disarm(&self) {
        self.lock().armed = None;
    }

    /// Wait until the factory reaches a phase matching `done`.
    ///
    /// Returns the phase observed last, which may not match on timeout.
    pub fn wait_for(&self, done: impl Fn(WorkerPhase) -> bool, timeout: Duration) -> WorkerPhase {
        let state = self.lock();
        let (state, _) = self
            .wake
            .wait_timeout_while(state, timeout, |s| !done(s.phase))
            .unwrap_or_else(PoisonError::into_inner);
        state.phase
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        let mut state = self.lock();
        state.phase = phase;
        self.wake.notify_all();
    }

    /// Publish a snapshot ahead of the readiness notification.
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        let mut state = self.lock();
        state.phase = WorkerPhase::Reporting;
        state.fitness = snapshot.fitness;
        state.round = snapshot.round;
        state.snapshot = Some(snapshot);
        self.wake.notify_all();
    }

    /// Park until resumed or stopped.
    pub(crate) fn park(&self) -> Wakeup {
        let mut state = self.lock();
        state.phase = WorkerPhase::Paused;
        self.wake.notify_all();

        state = self
            .wake
            .wait_while(state, |s| !s.permit && !s.stop)
            .unwrap_or_else(PoisonError::into_inner);

        if state.stop {
            return Wakeup::Stop;
        }
        state.permit = false;
        state.phase = WorkerPhase::Evolving;
        Wakeup::Resume(state.armed.take())
    }
}

/// Settings shared by every factory in a pool.
#[derive(Debug, Clone)]
pub struct FactorySettings {
    pub shapes: usize,
    pub spaces: usize,
    pub step: StepParams,
    pub exchange_timeout: Duration,
}

/// A factory: owns one layout and evolves it round after round.
pub struct Factory {
    handle: Arc<FactoryHandle>,
    settings: FactorySettings,
    rng: LayoutRng,
    notify: Sender<WorkerId>,
    layout: Layout,
    fitness: f64,
    round: u64,
}

impl Factory {
    pub fn new(
        handle: Arc<FactoryHandle>,
        settings: FactorySettings,
        rng: LayoutRng,
        notify: Sender<WorkerId>,
    ) -> Self {
        Self {
            handle,
            settings,
            rng,
            notify,
            layout: Layout::empty(),
            fitness: 0.0,
            round: 0,
        }
    }

    /// Start from a given layout instead of a random one.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.fitness = fitness(&layout);
        self.layout = layout;
        self.round = 1;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Run until stopped. Must be called on the factory's own thread.
    pub fn run(mut self) -> Result<(), WorkerError> {
        if self.round == 0 {
            self.handle.set_phase(WorkerPhase::Generating);
            self.layout = self
                .rng
                .generate(self.settings.shapes, self.settings.spaces);
            self.fitness = fitness(&self.layout);
            self.round = 1;
        }

        loop {
            self.report()?;
            match self.handle.park() {
                Wakeup::Stop => return Ok(()),
                Wakeup::Resume(crossover) => self.advance(crossover)?,
            }
        }
    }

    /// One evolution round: optional crossover, then mutate-and-select.
    pub fn advance(&mut self, crossover: Option<CrossoverOrder>) -> Result<(), WorkerError> {
        self.round += 1;

        if let Some(order) = crossover {
            let (row, column) = order.cell();
            let received = order.apply(&mut self.layout, self.settings.exchange_timeout)?;
            debug!(
                "{} round {}: crossover at ({row}, {column}) received {:?}",
                self.handle.id(),
                self.round,
                received
            );
        }

        let Scored { layout, fitness } = self.rng.evolve(&self.layout, &self.settings.step);
        self.layout = layout;
        self.fitness = fitness;
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            worker: self.handle.id(),
            round: self.round,
            fitness: self.fitness,
            layout: self.layout.clone(),
        }
    }

    fn report(&mut self) -> Result<(), WorkerError> {
        self.handle.publish(self.snapshot());
        self.notify
            .send(self.handle.id())
            .map_err(|_| WorkerError::SchedulerGone)
    }
}

/// Marks the handle failed if the factory thread unwinds.
struct PanicGuard(Arc<FactoryHandle>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.set_phase(WorkerPhase::Failed);
        }
    }
}

/// Spawn a factory on its own named thread.
pub fn spawn_factory(factory: Factory) -> io::Result<JoinHandle<()>> {
    let handle = Arc::clone(&factory.handle);
    thread::Builder::new()
        .name(handle.id().to_string())
        .spawn(move || {
            let guard = PanicGuard(Arc::clone(&handle));
            match factory.run() {
                Ok(()) => handle.set_phase(WorkerPhase::Stopped),
                Err(e) if handle.is_stopping() => {
                    debug!("{} exited during shutdown: {e}", handle.id());
                    handle.set_phase(WorkerPhase::Stopped);
                }
                Err(e) => {
                    error!("{} aborted: {e}", handle.id());
                    handle.set_phase(WorkerPhase::Failed);
                }
            }
            drop(guard);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{GRID_CELLS, Shape};
    use crossbeam_channel::{Receiver, bounded};

    const WAIT: Duration = Duration::from_secs(5);

    fn settings() -> FactorySettings {
        FactorySettings {
            shapes: 32,
            spaces: GRID_CELLS,
            step: StepParams::default(),
            exchange_timeout: WAIT,
        }
    }

    fn factory(id: usize, seed: u64) -> (Factory, Arc<FactoryHandle>, Receiver<WorkerId>) {
        let handle = Arc::new(FactoryHandle::new(WorkerId(id)));
        let (tx, rx) = bounded(4);
        let factory = Factory::new(Arc::clone(&handle), settings(), LayoutRng::new(seed), tx);
        (factory, handle, rx)
    }

    #[test]
    fn test_resume_before_park_is_not_lost() {
        let handle = FactoryHandle::new(WorkerId(0));
        handle.resume(None);
        assert!(matches!(handle.park(), Wakeup::Resume(None)));
        assert_eq!(handle.phase(), WorkerPhase::Evolving);
    }

    #[test]
    fn test_stop_releases_park() {
        let handle = Arc::new(FactoryHandle::new(WorkerId(0)));
        let parked = Arc::clone(&handle);
        let thread = thread::spawn(move || parked.park());

        assert_eq!(
            handle.wait_for(|p| p == WorkerPhase::Paused, WAIT),
            WorkerPhase::Paused
        );
        handle.stop();
        assert!(matches!(thread.join().unwrap(), Wakeup::Stop));
    }

    #[test]
    fn test_factory_reports_and_parks() {
        let (factory, handle, rx) = factory(2, 1);
        let thread = spawn_factory(factory).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), WorkerId(2));
        let snapshot = handle.take_snapshot().unwrap();
        assert_eq!(snapshot.worker, WorkerId(2));
        assert_eq!(snapshot.round, 1);
        assert_eq!(snapshot.layout.shape_count(), 32);
        assert_eq!(snapshot.fitness, fitness(&snapshot.layout));

        handle.resume(None);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), WorkerId(2));
        assert_eq!(handle.take_snapshot().unwrap().round, 2);

        handle.stop();
        thread.join().unwrap();
        assert_eq!(handle.phase(), WorkerPhase::Stopped);
    }

    #[test]
    fn test_paired_factories_swap_one_cell() {
        let mut left = Layout::filled(Shape::Triangle);
        left.set(2, 3, Shape::Circle);
        let right = Layout::filled(Shape::Square);

        let frozen = FactorySettings {
            step: StepParams {
                mutation: rand_distr::Bernoulli::new(0.0).unwrap(),
                survivors: 1,
                ..Default::default()
            },
            ..settings()
        };
        let (tx, _rx) = bounded(4);
        let mut a = Factory::new(
            Arc::new(FactoryHandle::new(WorkerId(0))),
            frozen.clone(),
            LayoutRng::new(1),
            tx.clone(),
        )
        .with_layout(left.clone());
        let b = Factory::new(
            Arc::new(FactoryHandle::new(WorkerId(1))),
            frozen,
            LayoutRng::new(2),
            tx,
        )
        .with_layout(right.clone());

        let (order_a, order_b) = CrossoverOrder::pair(2, 3);
        let peer = thread::spawn(move || {
            let mut b = b;
            b.advance(Some(order_b)).unwrap();
            b
        });
        a.advance(Some(order_a)).unwrap();
        let b = peer.join().unwrap();

        assert_eq!(a.layout().get(2, 3), Shape::Square);
        assert_eq!(b.layout().get(2, 3), Shape::Circle);
        assert_eq!(a.layout().distance(&left), 1);
        assert_eq!(b.layout().distance(&right), 1);
        assert_eq!(a.round(), 2);
    }

    #[test]
    fn test_broken_exchange_marks_failed() {
        let (factory, handle, rx) = factory(0, 3);
        let thread = spawn_factory(factory).unwrap();
        rx.recv_timeout(WAIT).unwrap();

        // The partner side is dropped right away.
        let (order, partner) = CrossoverOrder::pair(0, 0);
        drop(partner);
        handle.resume(Some(order));

        thread.join().unwrap();
        assert_eq!(handle.phase(), WorkerPhase::Failed);
    }
}
