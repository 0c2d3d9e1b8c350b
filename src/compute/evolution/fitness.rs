//! Adjacency-based fitness scoring for shape layouts.
//!
//! Every shape earns points for favorable neighbors in the 4-neighborhood;
//! cells past the grid edge count as "no neighbor". The raw sum is divided by
//! [`FITNESS_NORMALIZATION`].

use crate::schema::{GRID_SIDE, Layout, Shape};

/// Divisor that maps raw adjacency scores onto `[0, 1]`.
///
/// An all-square layout scores exactly this much.
pub const FITNESS_NORMALIZATION: f64 = 168.0;

/// Points awarded to a circle with no non-empty neighbor.
pub const ISOLATED_CIRCLE_BONUS: u32 = 5;

const LEFT: (isize, isize) = (-1, 0);
const RIGHT: (isize, isize) = (1, 0);
const BELOW: (isize, isize) = (0, -1);
const ABOVE: (isize, isize) = (0, 1);

/// Normalized fitness of a layout.
pub fn fitness(layout: &Layout) -> f64 {
    raw_score(layout) as f64 / FITNESS_NORMALIZATION
}

/// Unnormalized adjacency score of a layout.
pub fn raw_score(layout: &Layout) -> u32 {
    let mut score = 0;
    for x in 0..GRID_SIDE {
        for y in 0..GRID_SIDE {
            score += cell_score(layout, x, y);
        }
    }
    score
}

/// Score contributed by the cell at `(x, y)`.
pub fn cell_score(layout: &Layout, x: usize, y: usize) -> u32 {
    let at = |(dx, dy): (isize, isize)| layout.neighbor(x, y, dx, dy);
    let hit = |found: bool| found as u32;

    match layout.get(x, y) {
        Shape::Triangle => {
            hit(at(LEFT) == Some(Shape::InvertedTriangle))
                + hit(at(RIGHT) == Some(Shape::InvertedTriangle))
                + hit(matches!(
                    at(BELOW),
                    Some(Shape::Triangle | Shape::InvertedTriangle | Shape::Square)
                ))
        }
        Shape::InvertedTriangle => {
            hit(at(LEFT) == Some(Shape::Triangle))
                + hit(at(RIGHT) == Some(Shape::Triangle))
                + hit(matches!(at(ABOVE), Some(Shape::Square | Shape::Triangle)))
        }
        Shape::Square => {
            hit(at(LEFT) == Some(Shape::Square))
                + hit(at(RIGHT) == Some(Shape::Square))
                + hit(matches!(
                    at(BELOW),
                    Some(Shape::Square | Shape::InvertedTriangle)
                ))
                + hit(matches!(at(ABOVE), Some(Shape::Square | Shape::Triangle)))
        }
        Shape::Circle => {
            let isolated = [LEFT, RIGHT, BELOW, ABOVE]
                .into_iter()
                .all(|offset| at(offset).is_none_or(Shape::is_empty));
            if isolated { ISOLATED_CIRCLE_BONUS } else { 0 }
        }
        Shape::Empty => 0,
    }
}
