//! Compute module - Layout evaluation and the parallel factory engine.

pub mod evolution;

mod engine;
mod exchange;
mod factory;
mod feed;
mod generation;
mod scheduler;

pub use engine::*;
pub use exchange::*;
pub use factory::*;
pub use feed::*;
pub use generation::*;
pub use scheduler::*;
