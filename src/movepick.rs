//! Shared move cursor consumed by every worker at a split point.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::Move;

/// Hands out the remaining moves of a node, one per call, to whichever
/// worker asks first.
///
/// The cursor itself is an atomic counter so a fetch never blocks; callers
/// still take the split point lock around `next()` so the move they pull
/// and the best-value they compare against belong to the same snapshot.
pub struct MovePicker {
    moves: Vec<Move>,
    current: AtomicUsize,
}

impl MovePicker {
    pub fn new(moves: Vec<Move>) -> MovePicker {
        MovePicker {
            moves,
            current: AtomicUsize::new(0),
        }
    }

    /// Returns the next move together with its 1-based ordinal in the
    /// node's move order, or `None` once every move has been handed out.
    pub fn next(&self) -> Option<(Move, usize)> {
        let current = self.current.fetch_add(1, Ordering::Relaxed);
        if current < self.moves.len() {
            Some((self.moves[current], current + 1))
        } else {
            None
        }
    }

    /// Total number of moves, consumed or not.
    #[inline]
    pub fn count(&self) -> usize {
        self.moves.len()
    }
}
