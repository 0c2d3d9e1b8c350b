//! Candidate evaluation for shape layouts.
//!
//! This module holds the pure, single-threaded half of the optimizer:
//!
//! - **Fitness** (`fitness`): adjacency scoring normalized to `[0, 1]`
//! - **Genome Operations** (`genome`): random generation, per-cell mutation
//!   and the mutate-and-select step with stochastic acceptance
//!
//! # Example
//!
//! ```rust
//! use shape_factory::compute::evolution::{LayoutRng, StepParams, fitness};
//!
//! let mut rng = LayoutRng::new(42);
//! let parent = rng.generate(32, 49);
//! let next = rng.evolve(&parent, &StepParams::default());
//!
//! assert!(next.fitness >= 0.0 && next.fitness <= 1.0);
//! assert_eq!(next.fitness, fitness(&next.layout));
//! ```

mod fitness;
mod genome;

pub use fitness::{FITNESS_NORMALIZATION, ISOLATED_CIRCLE_BONUS, cell_score, fitness, raw_score};
pub use genome::{LayoutRng, Scored, StepParams};
