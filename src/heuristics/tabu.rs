//! Tabu search on the raw QUBO energy `x'Qx`.
//!
//! Every iteration moves to the best non-tabu single-bit flip, even when it
//! worsens the energy, and forbids flipping that bit again for `tenure`
//! iterations. Flip deltas are kept in a local field vector so one iteration
//! costs O(n).

use std::collections::VecDeque;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::qubo::QuboMatrix;
use crate::solution::Selection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabuConfig {
    pub iterations: usize,
    /// Length of the tabu list
    pub tenure: usize,
}

impl Default for TabuConfig {
    fn default() -> Self {
        TabuConfig { iterations: 1000, tenure: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct TabuOutcome {
    pub selection: Selection,
    pub best_energy: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TabuSearch {
    pub config: TabuConfig,
}

impl TabuSearch {
    pub fn new(config: TabuConfig) -> Self {
        TabuSearch { config }
    }

    /// Run from `initial`, or from a uniformly random vector drawn from `rng`
    pub fn solve<R: Rng>(&self, qubo: &QuboMatrix, initial: Option<Selection>, rng: &mut R) -> TabuOutcome {
        let n = qubo.size();
        let mut x: Vec<u8> = match initial {
            Some(sel) if sel.len() == n => sel.bits().to_vec(),
            _ => (0..n).map(|_| rng.gen_range(0..=1u8)).collect(),
        };

        // field[i] = sum over selected j != i of Q[i][j] + Q[j][i]
        let mut field = vec![0.0; n];
        for (i, f) in field.iter_mut().enumerate() {
            for j in 0..n {
                if j != i && x[j] == 1 {
                    *f += qubo.get(i, j) + qubo.get(j, i);
                }
            }
        }

        let mut current = qubo.energy(&x);
        let mut best = x.clone();
        let mut best_energy = current;
        let mut tabu: VecDeque<usize> = VecDeque::with_capacity(self.config.tenure + 1);
        let mut iterations = 0;

        for _ in 0..self.config.iterations {
            let mut best_move: Option<(usize, f64)> = None;
            for i in (0..n).filter(|i| !tabu.contains(i)) {
                let coupling = qubo.get(i, i) + field[i];
                let delta = if x[i] == 1 { -coupling } else { coupling };
                if best_move.map_or(true, |(_, d)| delta < d) {
                    best_move = Some((i, delta));
                }
            }

            // every bit is tabu and the list can no longer change
            let Some((k, delta)) = best_move else { break };

            x[k] ^= 1;
            current += delta;
            let sign = if x[k] == 1 { 1.0 } else { -1.0 };
            for (i, f) in field.iter_mut().enumerate() {
                if i != k {
                    *f += sign * (qubo.get(i, k) + qubo.get(k, i));
                }
            }

            if self.config.tenure > 0 {
                tabu.push_back(k);
                if tabu.len() > self.config.tenure {
                    tabu.pop_front();
                }
            }

            if current < best_energy {
                best.copy_from_slice(&x);
                best_energy = current;
            }
            iterations += 1;
        }

        debug!("Tabu search finished: {} iterations, best energy {:.4}", iterations, best_energy);

        TabuOutcome { selection: Selection::from_bits(best), best_energy, iterations }
    }

    pub fn name(&self) -> &str {
        "TabuSearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn toy_qubo() -> QuboMatrix {
        // minimum at x = [1, 0, 1] with energy -3 - 2 + 2 * 0.5 = -4
        QuboMatrix::from_rows(vec![
            vec![-3.0, 4.0, 0.5],
            vec![4.0, -1.0, 4.0],
            vec![0.5, 4.0, -2.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_finds_toy_optimum() {
        let q = toy_qubo();
        let ts = TabuSearch::new(TabuConfig { iterations: 50, tenure: 1 });
        let outcome = ts.solve(&q, Some(Selection::empty(3)), &mut ChaCha8Rng::seed_from_u64(0));

        assert_eq!(outcome.selection.bits(), &[1, 0, 1]);
        assert!((outcome.best_energy + 4.0).abs() < 1e-12);
        assert!((q.energy(outcome.selection.bits()) - outcome.best_energy).abs() < 1e-12);
    }

    #[test]
    fn test_random_start_is_seeded() {
        let q = toy_qubo();
        let ts = TabuSearch::default();
        let a = ts.solve(&q, None, &mut ChaCha8Rng::seed_from_u64(5));
        let b = ts.solve(&q, None, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a.selection, b.selection);
    }

    #[test]
    fn test_stops_when_everything_is_tabu() {
        // tenure 10 > n = 3: after three flips no move is allowed
        let ts = TabuSearch::new(TabuConfig { iterations: 100, tenure: 10 });
        let outcome = ts.solve(&toy_qubo(), Some(Selection::empty(3)), &mut ChaCha8Rng::seed_from_u64(0));
        assert_eq!(outcome.iterations, 3);
    }
}
