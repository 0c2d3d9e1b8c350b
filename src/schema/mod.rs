//! Schema module - Configuration, layout and status types for the shape factory.

mod config;
mod evolution;
mod layout;

pub use config::*;
pub use evolution::*;
pub use layout::*;
