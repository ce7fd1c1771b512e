//! Round-robin node selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::pool::NodeSelector;

/// Rotates through the pool in order. Stores the pool position after the
/// last pick, so a node is never picked twice in a row while another
/// candidate exists.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeSelector for RoundRobin {
    fn select(&self, candidates: &[usize]) -> Option<usize> {
        let cursor = self.cursor.load(Ordering::Relaxed);
        let chosen = candidates
            .iter()
            .copied()
            .find(|&idx| idx >= cursor)
            .or_else(|| candidates.first().copied())?;
        self.cursor.store(chosen + 1, Ordering::Relaxed);
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let rr = RoundRobin::new();
        let all = [0, 1, 2];
        let picks: Vec<_> = (0..6).map(|_| rr.select(&all).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_candidates_change_between_picks() {
        let rr = RoundRobin::new();
        assert_eq!(rr.select(&[0, 1, 2]), Some(0));
        // Node 1 went dead
        assert_eq!(rr.select(&[0, 2]), Some(2));
        assert_eq!(rr.select(&[0, 2]), Some(0));
        assert_eq!(rr.select(&[1]), Some(1));
        assert_eq!(rr.select(&[]), None);
    }
}
