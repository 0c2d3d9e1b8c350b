//! Layout types: the 7x7 shape grid each factory evolves.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Side length of every layout grid.
pub const GRID_SIDE: usize = 7;

/// Number of cells in a layout grid.
pub const GRID_CELLS: usize = GRID_SIDE * GRID_SIDE;

/// Content of a single layout cell.
///
/// The discriminants are the shape indices used in serialized layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Shape {
    /// Point-up triangle.
    Triangle = 0,
    /// Point-down triangle.
    InvertedTriangle = 1,
    /// Square.
    Square = 2,
    /// Circle, prefers to stand alone.
    Circle = 3,
    /// Unoccupied cell.
    #[default]
    Empty = 4,
}

impl Shape {
    /// Every cell kind, in index order.
    pub const ALL: [Shape; 5] = [
        Shape::Triangle,
        Shape::InvertedTriangle,
        Shape::Square,
        Shape::Circle,
        Shape::Empty,
    ];

    /// The four non-empty kinds.
    pub const SHAPES: [Shape; 4] = [
        Shape::Triangle,
        Shape::InvertedTriangle,
        Shape::Square,
        Shape::Circle,
    ];

    /// Look up a shape by its index (0-4).
    pub fn from_index(index: usize) -> Option<Shape> {
        Self::ALL.get(index).copied()
    }

    /// Numeric index of this shape.
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Shape::Empty
    }

    /// Single character used for text rendering.
    pub fn glyph(self) -> char {
        match self {
            Shape::Triangle => '^',
            Shape::InvertedTriangle => 'v',
            Shape::Square => '#',
            Shape::Circle => 'o',
            Shape::Empty => '.',
        }
    }
}

/// A 7x7 grid of shapes, indexed as `[x][y]`.
///
/// `x` runs left to right and `y` runs bottom to top, so "below" a cell is
/// `y - 1` and "above" it is `y + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Layout {
    cells: [[Shape; GRID_SIDE]; GRID_SIDE],
}

impl Layout {
    /// A layout with every cell empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A layout with every cell set to `shape`.
    pub fn filled(shape: Shape) -> Self {
        Self {
            cells: [[shape; GRID_SIDE]; GRID_SIDE],
        }
    }

    /// Build a layout from explicit cells.
    pub fn from_cells(cells: [[Shape; GRID_SIDE]; GRID_SIDE]) -> Self {
        Self { cells }
    }

    /// Build a layout from shape indices. Returns `None` if any index is > 4.
    pub fn from_indices(indices: [[u8; GRID_SIDE]; GRID_SIDE]) -> Option<Self> {
        let mut layout = Self::empty();
        for (x, column) in indices.iter().enumerate() {
            for (y, &index) in column.iter().enumerate() {
                layout.cells[x][y] = Shape::from_index(index as usize)?;
            }
        }
        Some(layout)
    }

    /// Shape at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if either coordinate is outside the grid.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Shape {
        self.cells[x][y]
    }

    /// Overwrite the shape at `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, shape: Shape) {
        self.cells[x][y] = shape;
    }

    /// Shape at the offset `(dx, dy)` from `(x, y)`, or `None` past the edge.
    #[inline]
    pub fn neighbor(&self, x: usize, y: usize, dx: isize, dy: isize) -> Option<Shape> {
        let nx = x.checked_add_signed(dx).filter(|&v| v < GRID_SIDE)?;
        let ny = y.checked_add_signed(dy).filter(|&v| v < GRID_SIDE)?;
        Some(self.cells[nx][ny])
    }

    /// Raw cell storage.
    pub fn cells(&self) -> &[[Shape; GRID_SIDE]; GRID_SIDE] {
        &self.cells
    }

    /// Iterate over `(x, y, shape)` for every cell.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Shape)> + '_ {
        self.cells.iter().enumerate().flat_map(|(x, column)| {
            column
                .iter()
                .enumerate()
                .map(move |(y, &shape)| (x, y, shape))
        })
    }

    /// Number of cells holding `shape`.
    pub fn count(&self, shape: Shape) -> usize {
        self.iter().filter(|&(_, _, s)| s == shape).count()
    }

    /// Number of non-empty cells.
    pub fn shape_count(&self) -> usize {
        GRID_CELLS - self.count(Shape::Empty)
    }

    /// Number of cells that differ from `other`.
    pub fn distance(&self, other: &Layout) -> usize {
        self.iter()
            .zip(other.iter())
            .filter(|((_, _, a), (_, _, b))| a != b)
            .count()
    }

    /// Render as text, top row first, one glyph per cell.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(GRID_CELLS * 2 + GRID_SIDE);
        for y in (0..GRID_SIDE).rev() {
            for x in 0..GRID_SIDE {
                if x > 0 {
                    out.push(' ');
                }
                out.push(self.cells[x][y].glyph());
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Stable identity of a factory within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Position of the factory in the pool.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Immutable copy of a factory's layout taken when it reports a finished round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Factory that produced this snapshot.
    pub worker: WorkerId,
    /// The factory's own round counter at report time.
    pub round: u64,
    /// Normalized fitness of `layout`.
    pub fitness: f64,
    /// Deep copy of the factory's layout.
    pub layout: Layout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_indices() {
        for (i, shape) in Shape::ALL.iter().enumerate() {
            assert_eq!(shape.index() as usize, i);
            assert_eq!(Shape::from_index(i), Some(*shape));
        }
        assert_eq!(Shape::from_index(5), None);
    }

    #[test]
    fn test_neighbor_edges() {
        let mut layout = Layout::empty();
        layout.set(1, 0, Shape::Square);

        assert_eq!(layout.neighbor(0, 0, 1, 0), Some(Shape::Square));
        assert_eq!(layout.neighbor(0, 0, -1, 0), None);
        assert_eq!(layout.neighbor(0, 0, 0, -1), None);
        assert_eq!(layout.neighbor(6, 6, 1, 0), None);
        assert_eq!(layout.neighbor(6, 6, 0, 1), None);
        assert_eq!(layout.neighbor(6, 6, -1, 0), Some(Shape::Empty));
    }

    #[test]
    fn test_counts() {
        let mut layout = Layout::empty();
        assert_eq!(layout.shape_count(), 0);

        layout.set(2, 3, Shape::Circle);
        layout.set(4, 4, Shape::Triangle);
        assert_eq!(layout.shape_count(), 2);
        assert_eq!(layout.count(Shape::Circle), 1);
        assert_eq!(layout.count(Shape::Empty), GRID_CELLS - 2);
        assert_eq!(layout.distance(&Layout::empty()), 2);
    }

    #[test]
    fn test_from_indices_rejects_out_of_range() {
        let mut indices = [[4u8; GRID_SIDE]; GRID_SIDE];
        assert!(Layout::from_indices(indices).is_some());
        indices[3][3] = 9;
        assert!(Layout::from_indices(indices).is_none());
    }

    #[test]
    fn test_render_top_row_first() {
        let mut layout = Layout::empty();
        layout.set(0, 6, Shape::Square);
        let text = layout.render();
        let first = text.lines().next().unwrap();
        assert!(first.starts_with('#'));
        assert_eq!(text.lines().count(), GRID_SIDE);
    }

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId(3).to_string(), "F3");
    }
}
