//! Simulated annealing over single-bit flips of the selection vector.
//!
//! The energy minimized is `x'Qx` plus a budget overrun penalty
//! `(10000 / budget) * max(0, cost(x) - budget)^2`. The budget is only softly
//! enforced: when the QUBO rewards outweigh the penalty the returned selection
//! can exceed the budget. Callers needing a hard guarantee should check
//! [`AnnealingOutcome::total_cost`] or use the greedy heuristic.

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::instance::Candidate;
use crate::qubo::QuboMatrix;
use crate::solution::Selection;

/// Scale of the budget overrun penalty, divided by the budget
pub const BUDGET_PENALTY_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    pub max_iterations: usize,
    pub initial_temperature: f64,
    /// Geometric cooling factor applied after every iteration
    pub cooling_rate: f64,
    /// The run stops once the temperature falls below this
    pub min_temperature: f64,
    /// Best energy is sampled into the history every this many iterations
    pub history_interval: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        AnnealingConfig {
            max_iterations: 10_000,
            initial_temperature: 20.0,
            cooling_rate: 0.999,
            min_temperature: 1e-6,
            history_interval: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnealingOutcome {
    /// Best selection visited, not necessarily the final state
    pub selection: Selection,
    pub best_energy: f64,
    pub total_cost: f64,
    pub iterations: usize,
    pub accepted_moves: usize,
    pub final_temperature: f64,
    /// Best-known energy sampled during the run; never increases
    pub best_history: Vec<f64>,
}

/// QUBO simulated annealing with a soft budget penalty
#[derive(Debug, Clone, Default)]
pub struct SimulatedAnnealing {
    pub config: AnnealingConfig,
}

impl SimulatedAnnealing {
    pub fn new(config: AnnealingConfig) -> Self {
        SimulatedAnnealing { config }
    }

    fn penalty(cost: f64, budget: f64) -> f64 {
        let overrun = (cost - budget).max(0.0);
        BUDGET_PENALTY_SCALE / budget * overrun * overrun
    }

    /// Full energy of a selection, as minimized by [`SimulatedAnnealing::solve`]
    pub fn energy(qubo: &QuboMatrix, candidates: &[Candidate], budget: f64, x: &[u8]) -> f64 {
        let cost: f64 = candidates.iter().zip(x).filter(|(_, &b)| b == 1).map(|(c, _)| c.cost).sum();
        qubo.energy(x) + Self::penalty(cost, budget)
    }

    pub fn solve<R: Rng>(
        &self,
        qubo: &QuboMatrix,
        candidates: &[Candidate],
        budget: f64,
        rng: &mut R,
    ) -> AnnealingOutcome {
        let n = candidates.len();
        let mut x = vec![0u8; n];
        let mut quad = 0.0;
        let mut cost = 0.0;

        let mut best = x.clone();
        let mut best_energy = Self::penalty(0.0, budget);
        let mut best_cost = 0.0;
        let mut best_history = vec![best_energy];

        let mut temperature = self.config.initial_temperature;
        let mut iterations = 0usize;
        let mut accepted_moves = 0usize;
        let interval = self.config.history_interval.max(1);

        while n > 0 && iterations < self.config.max_iterations && temperature >= self.config.min_temperature {
            let i = rng.gen_range(0..n);

            let e1 = quad + Self::penalty(cost, budget);
            let new_quad = quad + qubo.flip_delta(&x, i);
            let new_cost = if x[i] == 1 { cost - candidates[i].cost } else { cost + candidates[i].cost };
            let e2 = new_quad + Self::penalty(new_cost, budget);

            x[i] ^= 1;
            if e2 < best_energy {
                best.copy_from_slice(&x);
                best_energy = e2;
                best_cost = new_cost;
            }

            let accept = e2 < e1 || rng.gen::<f64>() < ((e1 - e2) / temperature).exp();
            if accept {
                quad = new_quad;
                cost = new_cost;
                accepted_moves += 1;
            } else {
                x[i] ^= 1;
            }

            iterations += 1;
            if iterations % interval == 0 {
                best_history.push(best_energy);
            }

            temperature *= self.config.cooling_rate;
        }

        if best_history.last() != Some(&best_energy) {
            best_history.push(best_energy);
        }

        debug!(
            "Annealing finished: {} iterations, {} accepted, best energy {:.4}, T={:.3e}",
            iterations, accepted_moves, best_energy, temperature
        );

        AnnealingOutcome {
            selection: Selection::from_bits(best),
            best_energy,
            total_cost: best_cost,
            iterations,
            accepted_moves,
            final_temperature: temperature,
            best_history,
        }
    }

    pub fn name(&self) -> &str {
        "SimulatedAnnealing"
    }
}
