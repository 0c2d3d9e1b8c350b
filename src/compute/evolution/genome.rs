//! Layout generation, mutation and selection.
//!
//! Provides random generation, per-cell mutation and the
//! mutate-and-select step each factory runs once per round.

use rand::prelude::*;
use rand_distr::Bernoulli;

use crate::schema::{ConfigError, FactoryConfig, GRID_SIDE, Layout, Shape};

use super::fitness::fitness;

/// Parameters of one evolution step, derived from the engine configuration.
#[derive(Debug, Clone)]
pub struct StepParams {
    /// Per-cell mutation trial.
    pub mutation: Bernoulli,
    /// Children produced per step.
    pub children: usize,
    /// Entries kept (out of children + parent) before selection.
    pub survivors: usize,
    /// Stochastic-acceptance draws before falling back to the best entry.
    pub draw_limit: usize,
}

impl StepParams {
    pub fn from_config(config: &FactoryConfig) -> Result<Self, ConfigError> {
        let mutation =
            Bernoulli::new(config.mutation_rate).map_err(|_| ConfigError::InvalidProbability {
                name: "mutation_rate",
                value: config.mutation_rate,
            })?;
        Ok(Self {
            mutation,
            children: config.children,
            survivors: config.survivors,
            draw_limit: config.selection_draw_limit,
        })
    }
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            mutation: Bernoulli::from_ratio(1, 49).expect("1/49 is a valid ratio"),
            children: 10,
            survivors: 7,
            draw_limit: 1000,
        }
    }
}

/// A layout paired with its fitness.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub layout: Layout,
    pub fitness: f64,
}

impl Scored {
    pub fn new(layout: Layout) -> Self {
        let fitness = fitness(&layout);
        Self { layout, fitness }
    }
}

/// Random number generator wrapper for layout operations.
pub struct LayoutRng {
    rng: StdRng,
}

impl LayoutRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Generate a layout with exactly `shapes` shapes among `spaces` cells.
    ///
    /// The cells are the top-left `isqrt(spaces)` square, filled in order.
    /// While both budgets are open each cell is drawn uniformly from all five
    /// kinds; once the empty budget is spent only shapes are drawn, and once
    /// every shape is placed the rest stay empty. Cells outside the square
    /// are empty.
    pub fn generate(&mut self, shapes: usize, spaces: usize) -> Layout {
        debug_assert!(shapes <= spaces, "cannot place {shapes} shapes in {spaces} spaces");

        let side = spaces.isqrt().min(GRID_SIDE);
        let empty_budget = spaces.saturating_sub(shapes);
        let mut placed = 0;
        let mut empties = 0;
        let mut layout = Layout::empty();

        for x in 0..side {
            for y in 0..side {
                let shape = if placed == shapes {
                    Shape::Empty
                } else if empties == empty_budget {
                    self.pick(&Shape::SHAPES)
                } else {
                    self.pick(&Shape::ALL)
                };

                if shape.is_empty() {
                    empties += 1;
                } else {
                    placed += 1;
                }
                layout.set(x, y, shape);
            }
        }

        layout
    }

    /// Uniform pick from a non-empty slice of shapes.
    fn pick(&mut self, shapes: &[Shape]) -> Shape {
        shapes[self.rng.gen_range(0..shapes.len())]
    }

    /// Mutate each cell independently to a uniformly random kind.
    ///
    /// Returns the number of cells that were re-drawn (a re-draw can land on
    /// the same kind).
    pub fn mutate(&mut self, layout: &mut Layout, mutation: &Bernoulli) -> usize {
        let mut redrawn = 0;
        for x in 0..GRID_SIDE {
            for y in 0..GRID_SIDE {
                if mutation.sample(&mut self.rng) {
                    let shape = self.pick(&Shape::ALL);
                    layout.set(x, y, shape);
                    redrawn += 1;
                }
            }
        }
        redrawn
    }

    /// Run one mutate-and-select step from `parent`.
    ///
    /// Produces `children` mutated copies, ranks them together with the
    /// unmodified parent, keeps the best `survivors` and picks one of those by
    /// stochastic acceptance.
    pub fn evolve(&mut self, parent: &Layout, params: &StepParams) -> Scored {
        let mut pool = Vec::with_capacity(params.children + 1);
        pool.push(Scored::new(parent.clone()));

        for _ in 0..params.children {
            let mut child = parent.clone();
            self.mutate(&mut child, &params.mutation);
            pool.push(Scored::new(child));
        }

        // Stable sort: the parent stays ahead of equally fit children.
        pool.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        pool.truncate(params.survivors.max(1));

        let fitnesses: Vec<f64> = pool.iter().map(|c| c.fitness).collect();
        let chosen = self.stochastic_acceptance(&fitnesses, params.draw_limit);
        pool.swap_remove(chosen)
    }

    /// Fitness-proportionate selection by stochastic acceptance.
    ///
    /// `ranked` must be sorted by descending fitness. A uniformly drawn entry
    /// is accepted with probability `fitness / max`. When the maximum is zero,
    /// or nothing is accepted within `draw_limit` draws, the first (best)
    /// entry is returned.
    pub fn stochastic_acceptance(&mut self, ranked: &[f64], draw_limit: usize) -> usize {
        let Some(&max) = ranked.first() else {
            return 0;
        };
        if max <= 0.0 {
            return 0;
        }

        for _ in 0..draw_limit {
            let i = self.rng.gen_range(0..ranked.len());
            if self.rng.r#gen::<f64>() < ranked[i] / max {
                return i;
            }
        }
        0
    }

    /// Bernoulli trial with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform `(row, column)` cell for a crossover.
    pub fn crossover_locus(&mut self) -> (usize, usize) {
        (
            self.rng.gen_range(0..GRID_SIDE),
            self.rng.gen_range(0..GRID_SIDE),
        )
    }
}
