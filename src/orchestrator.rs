//! Request handling: validation, candidate generation and solver dispatch.

use std::time::Instant;

use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::exact::{ExternalSolverBridge, SolverBackend, SolverGate};
use crate::geo::{GeoPoint, Region};
use crate::heuristics::{GreedyRatioHeuristic, SimulatedAnnealing, TabuSearch};
use crate::instance::{Candidate, CandidateGenerator, GenerationStrategy, SiteDataset};
use crate::qubo::{QuboBuilder, QuboPreset};
use crate::request::{Algorithm, QuboExport, SolveRequest};
use crate::solution::{Selection, SolveResult};

/// A validated request with its candidate set
#[derive(Debug, Clone)]
pub struct PreparedProblem {
    pub region: Region,
    pub population_center: GeoPoint,
    pub candidates: Vec<Candidate>,
    pub preset: QuboPreset,
}

/// Runs solve requests against one configuration.
///
/// Requests share nothing but the external solver gate, so one orchestrator
/// can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct SolveOrchestrator {
    config: PlannerConfig,
    gate: SolverGate,
}

impl SolveOrchestrator {
    pub fn new(config: PlannerConfig) -> Self {
        let gate = SolverGate::new(config.max_concurrent_external);
        SolveOrchestrator { config, gate }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Check a request before doing any work with it
    pub fn validate(request: &SolveRequest, dataset: Option<&SiteDataset>) -> Result<(Region, GeoPoint)> {
        if !(request.budget > 0.0) || !request.budget.is_finite() {
            return Err(PlannerError::invalid(format!("budget must be positive, got {}", request.budget)));
        }
        let center = match request.population_center {
            Some(c) if c.is_finite() => c,
            Some(c) => return Err(PlannerError::invalid(format!("population center {:?} is not finite", c))),
            None => return Err(PlannerError::invalid("population center is required")),
        };
        let region = Region::try_from(request.region.clone())?;
        if dataset.is_none() && request.cell_profile.is_none() {
            return Err(PlannerError::invalid("a cell profile is required when no site dataset is given"));
        }
        Ok((region, center))
    }

    /// Validate the request and generate its candidates. A dataset selects
    /// filter mode, otherwise a mesh is built from the request's cell profile.
    pub fn prepare(&self, request: &SolveRequest, dataset: Option<&SiteDataset>) -> Result<PreparedProblem> {
        let (region, center) = Self::validate(request, dataset)?;

        let (strategy, preset) = match (dataset, request.cell_profile) {
            (Some(ds), _) => (GenerationStrategy::Filter(ds), QuboPreset::dataset()),
            (None, Some(profile)) => (
                GenerationStrategy::Mesh { profile, budget: request.budget },
                QuboPreset::mesh(),
            ),
            (None, None) => return Err(PlannerError::invalid("no candidate source")),
        };

        let candidates = CandidateGenerator::generate(&region, strategy, &center)?;
        Ok(PreparedProblem { region, population_center: center, candidates, preset })
    }

    pub fn solve(&self, request: &SolveRequest, dataset: Option<&SiteDataset>) -> Result<SolveResult> {
        let start = Instant::now();
        let problem = self.prepare(request, dataset)?;
        let algorithm = request.algorithm;

        if problem.candidates.is_empty() {
            info!("No candidates inside the region, returning an empty selection");
            let mut result = SolveResult::empty(algorithm.name());
            result.computation_time = start.elapsed().as_secs_f64();
            return Ok(result);
        }

        info!(
            "Solving with {} over {} candidates ({} preset, budget {:.0})",
            algorithm,
            problem.candidates.len(),
            problem.preset.name,
            request.budget
        );

        let mut result = self.dispatch(algorithm, request, &problem)?;
        result.computation_time = start.elapsed().as_secs_f64();

        if !result.analysis.within_budget {
            warn!(
                "{} selection costs {:.0}, over the budget of {:.0}",
                algorithm, result.analysis.total_cost, request.budget
            );
        }
        info!(
            "{} selected {} of {} sites in {:.3}s",
            algorithm,
            result.analysis.num_sites,
            result.candidate_count,
            result.computation_time
        );
        Ok(result)
    }

    fn dispatch(&self, algorithm: Algorithm, request: &SolveRequest, problem: &PreparedProblem) -> Result<SolveResult> {
        let candidates = &problem.candidates;
        let budget = request.budget;
        let builder = QuboBuilder::from_preset(&problem.preset, budget, request.k, request.m);
        let mut rng = ChaCha8Rng::seed_from_u64(request.seed.unwrap_or(self.config.seed));

        let (selection, energy, iterations) = match algorithm {
            Algorithm::Greedy => {
                let outcome = GreedyRatioHeuristic::new().solve(candidates, budget);
                (outcome.selection, None, None)
            }
            Algorithm::Annealing => {
                let qubo = builder.build(candidates);
                let sa = SimulatedAnnealing::new(self.config.annealing.clone());
                let outcome = sa.solve(&qubo, candidates, budget, &mut rng);
                let energy = qubo.energy(outcome.selection.bits());
                (outcome.selection, Some(energy), Some(outcome.iterations))
            }
            Algorithm::Tabu => {
                let qubo = builder.build(candidates);
                let outcome = TabuSearch::new(self.config.tabu.clone()).solve(&qubo, None, &mut rng);
                (outcome.selection, Some(outcome.best_energy), Some(outcome.iterations))
            }
            Algorithm::Exact | Algorithm::Quantum => {
                let (backend, solver_config) = match algorithm {
                    Algorithm::Quantum => (SolverBackend::Quantum, &self.config.quantum),
                    _ => (SolverBackend::Exact, &self.config.exact),
                };
                let qubo = builder.build(candidates);
                let bridge = ExternalSolverBridge::from_config(backend, solver_config, self.config.downsample_cap)
                    .with_gate(self.gate.clone());
                let outcome = bridge.delegate(&qubo, candidates, budget, builder.targets.max_count)?;
                let selection = Selection::from_indices(candidates.len(), &outcome.selected);
                let energy = qubo.energy(selection.bits());
                (selection, Some(energy), None)
            }
        };

        let mut result = SolveResult::from_selection(algorithm.name(), candidates, &selection, budget);
        result.energy = energy;
        result.iterations = iterations;
        Ok(result)
    }

    /// Build the QUBO for a request without solving it
    pub fn export_qubo(&self, request: &SolveRequest, dataset: Option<&SiteDataset>) -> Result<QuboExport> {
        let problem = self.prepare(request, dataset)?;
        let builder = QuboBuilder::from_preset(&problem.preset, request.budget, request.k, request.m);
        let q = builder.build(&problem.candidates);
        info!("Exported {}x{} QUBO ({} preset)", q.size(), q.size(), problem.preset.name);
        Ok(QuboExport { q, candidates: problem.candidates, budget: request.budget })
    }
}

impl Default for SolveOrchestrator {
    fn default() -> Self {
        SolveOrchestrator::new(PlannerConfig::default())
    }
}
