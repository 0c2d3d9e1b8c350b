//! Engine assembly: validates the configuration, spawns the factories and
//! the scheduler, and hands back the run's result on join.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::schema::{ConfigError, FactoryConfig, RunStats, Snapshot, WorkerId, WorkerStatus};

use super::evolution::{LayoutRng, StepParams};
use super::factory::{Factory, FactoryHandle, FactorySettings, spawn_factory};
use super::feed::{BestView, GenerationFeed, generation_channel};
use super::generation::Generation;
use super::scheduler::{Scheduler, SchedulerOutcome, SchedulerSettings};

/// Errors starting or joining an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Population of {required} needs {required} parallel units, host has {available}")]
    InsufficientParallelism { required: usize, available: usize },
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("Scheduler thread panicked")]
    SchedulerPanicked,
}

/// Result of an engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionResult {
    /// The generation open at shutdown if it had members, else the last
    /// published one.
    pub final_generation: Option<Generation>,
    /// The last generation published on the feed.
    pub last_complete: Option<Generation>,
    /// Best snapshot seen across the run.
    pub best: Option<Snapshot>,
    pub stats: RunStats,
}

impl EvolutionResult {
    fn from_outcome(outcome: SchedulerOutcome, published_best: Option<Snapshot>) -> Self {
        let mut best = published_best;
        if let Some(open_best) = outcome.open.as_ref().and_then(Generation::best)
            && best.as_ref().is_none_or(|b| open_best.fitness > b.fitness)
        {
            best = Some(open_best.clone());
        }

        let final_generation = outcome.open.or_else(|| outcome.last_complete.clone());
        Self {
            final_generation,
            last_complete: outcome.last_complete,
            best,
            stats: outcome.stats,
        }
    }
}

/// Parallel units available to this process.
pub fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Derive an independent RNG per stream from an optional base seed.
///
/// Stream 0 is the scheduler; factory `i` uses stream `i + 1`.
fn stream_rng(seed: Option<u64>, stream: u64) -> LayoutRng {
    match seed {
        Some(seed) => LayoutRng::new(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => LayoutRng::random(),
    }
}

/// A validated, not yet started engine.
pub struct FactoryEngine {
    config: FactoryConfig,
    stop: Arc<AtomicBool>,
}

impl FactoryEngine {
    /// Validate `config` and check the host can run every factory in parallel.
    pub fn new(config: FactoryConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let available = available_parallelism();
        if config.population > available {
            if config.enforce_parallelism {
                return Err(EngineError::InsufficientParallelism {
                    required: config.population,
                    available,
                });
            }
            warn!(
                "Running {} factories on {available} parallel units",
                config.population
            );
        }

        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Get a handle that stops the run once set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Spawn the factories and the scheduler.
    pub fn start(self) -> Result<RunningEngine, EngineError> {
        let Self { config, stop } = self;
        let population = config.population;

        let settings = FactorySettings {
            shapes: config.shapes,
            spaces: config.spaces,
            step: StepParams::from_config(&config)?,
            exchange_timeout: config.exchange_timeout(),
        };

        let (notify_tx, notify_rx) = bounded(population);
        let handles: Vec<Arc<FactoryHandle>> = (0..population)
            .map(|i| Arc::new(FactoryHandle::new(WorkerId(i))))
            .collect();

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(population);
        for handle in &handles {
            let rng = stream_rng(config.random_seed, handle.id().index() as u64 + 1);
            let factory = Factory::new(
                Arc::clone(handle),
                settings.clone(),
                rng,
                notify_tx.clone(),
            );
            match spawn_factory(factory) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    handles.iter().for_each(|h| h.stop());
                    drop(notify_rx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e.into());
                }
            }
        }
        drop(notify_tx);

        let (sink, feed) = generation_channel(config.publish_capacity, config.backpressure);
        let best = BestView::new();
        let scheduler = Scheduler::new(
            handles.clone(),
            SchedulerSettings {
                crossover_rate: config.crossover_rate,
                notify_timeout: config.notify_timeout(),
                iteration_cap: config.iteration_cap(),
                max_generations: config.max_generations,
            },
            stream_rng(config.random_seed, 0),
            sink,
            best.clone(),
        );

        info!(
            "Started {population} factories: {} shapes in {} spaces",
            config.shapes, config.spaces
        );

        let scheduler_stop = Arc::clone(&stop);
        let scheduler = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || scheduler.run(notify_rx, scheduler_stop, workers))
            .inspect_err(|_| handles.iter().for_each(|h| h.stop()))?;

        Ok(RunningEngine {
            feed,
            best,
            stop,
            handles,
            scheduler,
        })
    }

    /// Start and block until the run ends, discarding the generation feed.
    pub fn run(self) -> Result<EvolutionResult, EngineError> {
        self.start()?.join()
    }
}

/// A running engine.
pub struct RunningEngine {
    feed: GenerationFeed,
    best: BestView,
    stop: Arc<AtomicBool>,
    handles: Vec<Arc<FactoryHandle>>,
    scheduler: JoinHandle<SchedulerOutcome>,
}

impl RunningEngine {
    /// Completed generations, in round order.
    pub fn feed(&self) -> &GenerationFeed {
        &self.feed
    }

    /// Best snapshot across completed generations.
    pub fn best(&self) -> &BestView {
        &self.best
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Ask the scheduler to stop on its next iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Current phase, fitness and round of every factory.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.handles.iter().map(|h| h.status()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Wait for the scheduler to finish and collect the result.
    ///
    /// Does not request a stop; call [`RunningEngine::stop`] first to end an
    /// unbounded run.
    pub fn join(self) -> Result<EvolutionResult, EngineError> {
        let Self {
            feed,
            best,
            handles,
            scheduler,
            ..
        } = self;
        // Nobody reads this copy; a blocking sink must not wait on it.
        drop(feed);

        let outcome = scheduler.join().map_err(|_| {
            handles.iter().for_each(|h| h.stop());
            EngineError::SchedulerPanicked
        })?;

        info!(
            "Run finished ({:?}): {} generations in {:.2}s",
            outcome.stats.stop_reason, outcome.stats.generations, outcome.stats.elapsed_seconds
        );
        Ok(EvolutionResult::from_outcome(outcome, best.get()))
    }
}
