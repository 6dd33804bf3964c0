//! Ratio greedy: rank by energy per unit cost, take whatever still fits.
//!
//! Unlike the QUBO-based solvers the budget is a hard constraint here: a
//! candidate is accepted only if the running cost plus its own cost stays
//! within the budget. A skipped candidate is never revisited.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::instance::Candidate;
use crate::solution::Selection;

/// One accepted candidate, recorded when progress tracking is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreedyStep {
    pub step: usize,
    pub index: usize,
    pub total_cost: f64,
    pub total_energy: f64,
    pub total_population: f64,
}

#[derive(Debug, Clone)]
pub struct GreedyOutcome {
    pub selection: Selection,
    pub total_cost: f64,
    pub steps: Vec<GreedyStep>,
}

/// Budget-respecting energy/cost ratio heuristic
#[derive(Debug, Clone, Default)]
pub struct GreedyRatioHeuristic {
    /// Keep a [`GreedyStep`] for every acceptance
    pub record_progress: bool,
}

impl GreedyRatioHeuristic {
    pub fn new() -> Self {
        GreedyRatioHeuristic { record_progress: false }
    }

    pub fn with_progress() -> Self {
        GreedyRatioHeuristic { record_progress: true }
    }

    /// Candidate indices by descending `energy / cost`; ties keep list order
    pub fn ranking(candidates: &[Candidate]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by_key(|&i| Reverse(OrderedFloat(candidates[i].energy / candidates[i].cost)));
        order
    }

    pub fn solve(&self, candidates: &[Candidate], budget: f64) -> GreedyOutcome {
        let mut selection = Selection::empty(candidates.len());
        let mut total_cost = 0.0;
        let mut total_energy = 0.0;
        let mut total_population = 0.0;
        let mut steps = Vec::new();

        for i in Self::ranking(candidates) {
            let c = &candidates[i];
            if total_cost + c.cost > budget {
                continue;
            }

            selection.select(i);
            total_cost += c.cost;
            total_energy += c.energy;
            total_population += c.population_coverage;

            if self.record_progress {
                steps.push(GreedyStep {
                    step: steps.len() + 1,
                    index: i,
                    total_cost,
                    total_energy,
                    total_population,
                });
            }
        }

        GreedyOutcome { selection, total_cost, steps }
    }

    pub fn name(&self) -> &str {
        "Greedy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn candidates(costs: &[f64], energies: &[f64]) -> Vec<Candidate> {
        costs
            .iter()
            .zip(energies)
            .map(|(&cost, &energy)| Candidate {
                location: GeoPoint::new(0.0, 0.0),
                cost,
                energy,
                population_coverage: 1.0,
                distance_km: 0.0,
                site_id: None,
            })
            .collect()
    }

    #[test]
    fn test_ratio_ranking_and_budget() {
        let cands = candidates(&[10.0, 20.0, 15.0], &[5.0, 8.0, 6.0]);
        assert_eq!(GreedyRatioHeuristic::ranking(&cands), vec![0, 1, 2]);

        let outcome = GreedyRatioHeuristic::new().solve(&cands, 25.0);
        // 0 fits (10), 1 would reach 30 and is skipped, 2 brings the total to 25
        assert_eq!(outcome.selection.bits(), &[1, 0, 1]);
        assert_eq!(outcome.total_cost, 25.0);
    }

    #[test]
    fn test_skip_then_accept_later_rank() {
        // rank: 0 (1.0), 1 (0.5), 2 (0.1); after 0, budget left is 2
        let cands = candidates(&[8.0, 5.0, 2.0], &[8.0, 2.5, 0.2]);
        let outcome = GreedyRatioHeuristic::new().solve(&cands, 10.0);
        // 1 is skipped, 2 still fits because it comes later in rank order
        assert_eq!(outcome.selection.bits(), &[1, 0, 1]);
    }

    #[test]
    fn test_empty_input() {
        let outcome = GreedyRatioHeuristic::new().solve(&[], 100.0);
        assert!(outcome.selection.is_empty());
        assert_eq!(outcome.total_cost, 0.0);
    }

    #[test]
    fn test_progress_recording() {
        let cands = candidates(&[10.0, 20.0, 15.0], &[5.0, 8.0, 6.0]);
        let outcome = GreedyRatioHeuristic::with_progress().solve(&cands, 25.0);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].index, 0);
        assert_eq!(outcome.steps[1].index, 2);
        assert_eq!(outcome.steps[1].total_energy, 11.0);
    }
}
