//! Uniform random node selection.

use rand::Rng;

use crate::pool::NodeSelector;

#[derive(Debug, Default)]
pub struct Random;

impl NodeSelector for Random {
    fn select(&self, candidates: &[usize]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[pick])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_picks_a_candidate() {
        let selector = Random;
        assert_eq!(selector.select(&[]), None);
        for _ in 0..50 {
            let pick = selector.select(&[3, 5, 8]).unwrap();
            assert!([3, 5, 8].contains(&pick));
        }
    }
}
