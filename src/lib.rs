//! Shape Factory - Parallel evolutionary optimizer for 7x7 shape layouts.
//!
//! A fixed pool of factory threads each owns one layout, mutates and
//! re-scores it every round, then waits for the scheduler to pair it with a
//! sibling for crossover. The scheduler assembles finished rounds into
//! generations and publishes them in round order.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, layout and status types
//! - `compute`: Fitness and genome operations, factories, crossover
//!   exchange, generations and the scheduler
//!
//! # Example
//!
//! ```rust,no_run
//! use shape_factory::{FactoryConfig, FactoryEngine};
//!
//! let config = FactoryConfig {
//!     population: 4,
//!     max_generations: Some(500),
//!     ..Default::default()
//! };
//!
//! let running = FactoryEngine::new(config)?.start()?;
//! for generation in running.feed().iter().take(10) {
//!     println!("{generation}");
//! }
//!
//! let result = running.join()?;
//! if let Some(best) = result.best {
//!     println!("Best fitness {:.5}:\n{}", best.fitness, best.layout);
//! }
//! # Ok::<(), shape_factory::EngineError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{
    BestView, EngineError, EvolutionResult, FactoryEngine, Generation, GenerationFeed,
    RunningEngine,
};
pub use schema::{FactoryConfig, Layout, Shape, Snapshot, WorkerId};
