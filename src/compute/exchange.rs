//! Two-party crossover exchange.
//!
//! A crossover swaps the value of one cell between two paired factories.
//! Each side holds one [`CrossoverOrder`]; both offer their own value and
//! block until the peer's value arrives. Neither side leads.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::schema::{GRID_SIDE, Layout, Shape};

/// Errors from a crossover exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("Crossover partner exited before the exchange completed")]
    PeerGone,
    #[error("Crossover partner did not offer a value within {0:?}")]
    TimedOut(Duration),
}

/// One side of a crossover at a fixed cell.
#[derive(Debug)]
pub struct CrossoverOrder {
    row: usize,
    column: usize,
    offer: Sender<Shape>,
    receive: Receiver<Shape>,
}

impl CrossoverOrder {
    /// Create the two linked sides of an exchange at `(row, column)`.
    ///
    /// # Panics
    ///
    /// Panics if the cell is outside the grid.
    pub fn pair(row: usize, column: usize) -> (CrossoverOrder, CrossoverOrder) {
        assert!(
            row < GRID_SIDE && column < GRID_SIDE,
            "crossover cell ({row}, {column}) outside the grid"
        );

        let (a_tx, a_rx) = bounded(1);
        let (b_tx, b_rx) = bounded(1);
        (
            CrossoverOrder {
                row,
                column,
                offer: a_tx,
                receive: b_rx,
            },
            CrossoverOrder {
                row,
                column,
                offer: b_tx,
                receive: a_rx,
            },
        )
    }

    /// Cell this exchange swaps.
    pub fn cell(&self) -> (usize, usize) {
        (self.row, self.column)
    }

    /// Offer `value` and wait for the peer's value.
    pub fn swap(self, value: Shape, timeout: Duration) -> Result<Shape, ExchangeError> {
        // Capacity 1: only fails if the peer already dropped its side.
        self.offer
            .send(value)
            .map_err(|_| ExchangeError::PeerGone)?;

        self.receive.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ExchangeError::TimedOut(timeout),
            RecvTimeoutError::Disconnected => ExchangeError::PeerGone,
        })
    }

    /// Swap this side's cell in `layout` with the peer's.
    ///
    /// Returns the value that was received. On error the layout is unchanged.
    pub fn apply(self, layout: &mut Layout, timeout: Duration) -> Result<Shape, ExchangeError> {
        let (row, column) = self.cell();
        let theirs = self.swap(layout.get(row, column), timeout)?;
        layout.set(row, column, theirs);
        Ok(theirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_swap_is_symmetric() {
        let (a, b) = CrossoverOrder::pair(0, 0);

        let handle = thread::spawn(move || b.swap(Shape::Circle, TIMEOUT));
        let got_a = a.swap(Shape::Square, TIMEOUT).unwrap();
        let got_b = handle.join().unwrap().unwrap();

        assert_eq!(got_a, Shape::Circle);
        assert_eq!(got_b, Shape::Square);
    }

    #[test]
    fn test_apply_changes_exactly_one_cell() {
        let left = Layout::filled(Shape::Triangle);
        let right = Layout::filled(Shape::Square);
        let (a, b) = CrossoverOrder::pair(2, 3);

        let handle = thread::spawn(move || {
            let mut layout = right;
            b.apply(&mut layout, TIMEOUT).unwrap();
            layout
        });
        let mut left_after = left.clone();
        a.apply(&mut left_after, TIMEOUT).unwrap();
        let right_after = handle.join().unwrap();

        assert_eq!(left_after.get(2, 3), Shape::Square);
        assert_eq!(right_after.get(2, 3), Shape::Triangle);
        assert_eq!(left_after.distance(&left), 1);
        assert_eq!(right_after.distance(&Layout::filled(Shape::Square)), 1);
    }

    #[test]
    fn test_peer_dropped() {
        let (a, b) = CrossoverOrder::pair(1, 1);
        drop(b);
        let mut layout = Layout::filled(Shape::Circle);
        assert_eq!(
            a.apply(&mut layout, TIMEOUT),
            Err(ExchangeError::PeerGone)
        );
        assert_eq!(layout, Layout::filled(Shape::Circle));
    }

    #[test]
    fn test_peer_never_offers() {
        let (a, _b) = CrossoverOrder::pair(1, 1);
        let timeout = Duration::from_millis(20);
        assert_eq!(
            a.swap(Shape::Empty, timeout),
            Err(ExchangeError::TimedOut(timeout))
        );
    }

    #[test]
    #[should_panic]
    fn test_rejects_cell_outside_grid() {
        let _ = CrossoverOrder::pair(GRID_SIDE, 0);
    }
}
