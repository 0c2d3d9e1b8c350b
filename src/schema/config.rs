//! Configuration types for the shape factory engine.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::GRID_CELLS;

/// Top-level engine configuration. Immutable once the engine starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Number of factories (population size, k).
    #[serde(default = "default_population")]
    pub population: usize,
    /// Number of shapes placed in a freshly generated layout (n).
    #[serde(default = "default_shapes")]
    pub shapes: usize,
    /// Number of cells available for shapes (m). Must be a perfect square.
    #[serde(default = "default_spaces")]
    pub spaces: usize,
    /// Per-cell mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Probability that a ready pair performs crossover.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Children produced per evolution step.
    #[serde(default = "default_children")]
    pub children: usize,
    /// Entries (children plus parent) kept before stochastic selection.
    #[serde(default = "default_survivors")]
    pub survivors: usize,
    /// Maximum stochastic-acceptance draws before falling back to the best.
    #[serde(default = "default_selection_draw_limit")]
    pub selection_draw_limit: usize,
    /// How long the scheduler waits for a notification before dumping status.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
    /// How long a factory waits for its crossover partner.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    /// Scheduler iterations allowed per factory.
    #[serde(default = "default_iteration_cap_factor")]
    pub iteration_cap_factor: u64,
    /// Stop after this many generations have been published.
    #[serde(default)]
    pub max_generations: Option<u64>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Refuse to start when the host has fewer execution units than factories.
    #[serde(default = "default_enforce_parallelism")]
    pub enforce_parallelism: bool,
    /// Capacity of the outgoing generation channel.
    #[serde(default = "default_publish_capacity")]
    pub publish_capacity: usize,
    /// What the scheduler does when the outgoing channel is full.
    #[serde(default)]
    pub backpressure: Backpressure,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            population: default_population(),
            shapes: default_shapes(),
            spaces: default_spaces(),
            mutation_rate: default_mutation_rate(),
            crossover_rate: default_crossover_rate(),
            children: default_children(),
            survivors: default_survivors(),
            selection_draw_limit: default_selection_draw_limit(),
            notify_timeout_ms: default_notify_timeout_ms(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
            iteration_cap_factor: default_iteration_cap_factor(),
            max_generations: None,
            random_seed: None,
            enforce_parallelism: default_enforce_parallelism(),
            publish_capacity: default_publish_capacity(),
            backpressure: Backpressure::default(),
        }
    }
}

fn default_population() -> usize {
    4
}
fn default_shapes() -> usize {
    32
}
fn default_spaces() -> usize {
    GRID_CELLS
}
fn default_mutation_rate() -> f64 {
    1.0 / GRID_CELLS as f64
}
fn default_crossover_rate() -> f64 {
    0.2
}
fn default_children() -> usize {
    10
}
fn default_survivors() -> usize {
    7
}
fn default_selection_draw_limit() -> usize {
    1000
}
fn default_notify_timeout_ms() -> u64 {
    5000
}
fn default_exchange_timeout_ms() -> u64 {
    30_000
}
fn default_iteration_cap_factor() -> u64 {
    100_000
}
fn default_enforce_parallelism() -> bool {
    true
}
fn default_publish_capacity() -> usize {
    10_000
}

/// Behavior of the scheduler when the consumer falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backpressure {
    /// Wait for the consumer to make room.
    #[default]
    Block,
    /// Evict the oldest queued generation to make room.
    DropOldest,
}

impl FactoryConfig {
    /// Upper bound on scheduler loop iterations.
    pub fn iteration_cap(&self) -> u64 {
        (self.population as u64).saturating_mul(self.iteration_cap_factor)
    }

    #[inline]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    #[inline]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.spaces == 0 || self.spaces > GRID_CELLS {
            return Err(ConfigError::InvalidSpaces(self.spaces));
        }
        let side = self.spaces.isqrt();
        if side * side != self.spaces {
            return Err(ConfigError::NotPerfectSquare(self.spaces));
        }
        if self.shapes > self.spaces {
            return Err(ConfigError::TooManyShapes {
                shapes: self.shapes,
                spaces: self.spaces,
            });
        }
        check_probability(self.mutation_rate, "mutation_rate")?;
        check_probability(self.crossover_rate, "crossover_rate")?;
        if self.children == 0 {
            return Err(ConfigError::NoChildren);
        }
        if self.survivors == 0 || self.survivors > self.children + 1 {
            return Err(ConfigError::InvalidSurvivors {
                survivors: self.survivors,
                entries: self.children + 1,
            });
        }
        if self.selection_draw_limit == 0 {
            return Err(ConfigError::ZeroLimit("selection_draw_limit"));
        }
        if self.notify_timeout_ms == 0 {
            return Err(ConfigError::ZeroLimit("notify_timeout_ms"));
        }
        if self.exchange_timeout_ms == 0 {
            return Err(ConfigError::ZeroLimit("exchange_timeout_ms"));
        }
        if self.iteration_cap_factor == 0 {
            return Err(ConfigError::ZeroLimit("iteration_cap_factor"));
        }
        if self.publish_capacity == 0 {
            return Err(ConfigError::ZeroLimit("publish_capacity"));
        }
        Ok(())
    }
}

fn check_probability(value: f64, name: &'static str) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability { name, value })
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population must contain at least one factory")]
    EmptyPopulation,
    #[error("Spaces must be between 1 and 49, got {0}")]
    InvalidSpaces(usize),
    #[error("Spaces must be a perfect square, got {0}")]
    NotPerfectSquare(usize),
    #[error("Cannot place {shapes} shapes in {spaces} spaces")]
    TooManyShapes { shapes: usize, spaces: usize },
    #[error("{name} must be a probability in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("Children per round must be non-zero")]
    NoChildren,
    #[error("Survivors must be between 1 and {entries}, got {survivors}")]
    InvalidSurvivors { survivors: usize, entries: usize },
    #[error("{0} must be non-zero")]
    ZeroLimit(&'static str),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
