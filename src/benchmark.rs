//! Benchmarking module for comparing site selection algorithms.
//!
//! Runs every configured algorithm on one request, repeating the stochastic
//! ones over consecutive seeds, and aggregates the outcomes per algorithm.

use crate::instance::SiteDataset;
use crate::orchestrator::SolveOrchestrator;
use crate::request::{Algorithm, SolveRequest};

use chrono::Local;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Result of running a single algorithm once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    /// Algorithm name
    pub algorithm: String,
    /// Seed of the run
    pub seed: u64,
    /// Number of candidates in the region
    pub num_candidates: usize,
    /// Number of selected sites
    pub num_selected: usize,
    pub total_cost: f64,
    pub total_energy: f64,
    pub total_population: f64,
    pub within_budget: bool,
    /// QUBO energy of the selection (if a QUBO was built)
    pub qubo_energy: Option<f64>,
    /// Computation time in seconds
    pub time: f64,
    /// Failure message when the run did not produce a selection
    pub error: Option<String>,
}

/// Aggregated statistics for an algorithm over its successful runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmStatistics {
    pub algorithm: String,
    pub num_runs: usize,
    pub num_failed: usize,
    pub num_within_budget: usize,
    /// Average total energy of the selections
    pub avg_energy: f64,
    pub best_energy: f64,
    pub worst_energy: f64,
    /// Sample standard deviation of total energy, 0 for a single run
    pub std_energy: f64,
    pub avg_cost: f64,
    pub avg_population: f64,
    pub avg_time: f64,
    pub total_time: f64,
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of runs per stochastic algorithm
    pub num_runs: usize,
    /// Seed of the first run; run `r` uses `base_seed + r`
    pub base_seed: u64,
    pub algorithms: Vec<Algorithm>,
    /// Run the seeds of one algorithm in parallel
    pub parallel: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            num_runs: 5,
            base_seed: 42,
            algorithms: vec![Algorithm::Greedy, Algorithm::Annealing, Algorithm::Tabu],
            parallel: true,
        }
    }
}

impl BenchmarkConfig {
    /// Deterministic and external solvers run once
    pub fn runs_for(&self, algorithm: Algorithm) -> usize {
        match algorithm {
            Algorithm::Annealing | Algorithm::Tabu => self.num_runs.max(1),
            Algorithm::Greedy | Algorithm::Exact | Algorithm::Quantum => 1,
        }
    }

    pub fn total_runs(&self) -> usize {
        self.algorithms.iter().map(|&a| self.runs_for(a)).sum()
    }
}

/// Benchmarking engine
pub struct Benchmark {
    config: BenchmarkConfig,
    orchestrator: SolveOrchestrator,
    results: Vec<AlgorithmResult>,
}

impl Benchmark {
    pub fn new(config: BenchmarkConfig, orchestrator: SolveOrchestrator) -> Self {
        Benchmark { config, orchestrator, results: Vec::new() }
    }

    /// Run every configured algorithm on `request`; its own algorithm and
    /// seed are ignored.
    pub fn run(&mut self, request: &SolveRequest, dataset: Option<&SiteDataset>, progress: Option<&ProgressBar>) {
        for &algorithm in &self.config.algorithms {
            log::info!("Benchmarking {} ({} runs)", algorithm, self.config.runs_for(algorithm));

            let seeds: Vec<u64> = (0..self.config.runs_for(algorithm) as u64)
                .map(|r| self.config.base_seed + r)
                .collect();

            let run_one = |&seed: &u64| {
                let result = self.run_single(algorithm, seed, request, dataset);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                result
            };

            let batch: Vec<AlgorithmResult> = if self.config.parallel {
                seeds.par_iter().map(run_one).collect()
            } else {
                seeds.iter().map(run_one).collect()
            };
            self.results.extend(batch);
        }
    }

    fn run_single(
        &self,
        algorithm: Algorithm,
        seed: u64,
        request: &SolveRequest,
        dataset: Option<&SiteDataset>,
    ) -> AlgorithmResult {
        let run_request = SolveRequest { algorithm, seed: Some(seed), ..request.clone() };

        match self.orchestrator.solve(&run_request, dataset) {
            Ok(solution) => AlgorithmResult {
                algorithm: algorithm.name().to_string(),
                seed,
                num_candidates: solution.candidate_count,
                num_selected: solution.analysis.num_sites,
                total_cost: solution.analysis.total_cost,
                total_energy: solution.analysis.total_energy,
                total_population: solution.analysis.total_population,
                within_budget: solution.analysis.within_budget,
                qubo_energy: solution.energy,
                time: solution.computation_time,
                error: None,
            },
            Err(e) => {
                log::error!("{} failed with seed {}: {}", algorithm, seed, e);
                AlgorithmResult {
                    algorithm: algorithm.name().to_string(),
                    seed,
                    num_candidates: 0,
                    num_selected: 0,
                    total_cost: 0.0,
                    total_energy: 0.0,
                    total_population: 0.0,
                    within_budget: false,
                    qubo_energy: None,
                    time: 0.0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Compute statistics for each algorithm, best average energy first
    pub fn compute_statistics(&self) -> Vec<AlgorithmStatistics> {
        let mut by_algorithm: BTreeMap<&str, Vec<&AlgorithmResult>> = BTreeMap::new();
        for result in &self.results {
            by_algorithm.entry(result.algorithm.as_str()).or_default().push(result);
        }

        let mut statistics = Vec::new();

        for (algo, results) in by_algorithm {
            let ok: Vec<&AlgorithmResult> = results.iter().copied().filter(|r| r.error.is_none()).collect();
            if ok.is_empty() {
                statistics.push(AlgorithmStatistics {
                    algorithm: algo.to_string(),
                    num_runs: results.len(),
                    num_failed: results.len(),
                    num_within_budget: 0,
                    avg_energy: 0.0,
                    best_energy: 0.0,
                    worst_energy: 0.0,
                    std_energy: 0.0,
                    avg_cost: 0.0,
                    avg_population: 0.0,
                    avg_time: 0.0,
                    total_time: 0.0,
                });
                continue;
            }

            let energies: Vec<f64> = ok.iter().map(|r| r.total_energy).collect();
            let costs: Vec<f64> = ok.iter().map(|r| r.total_cost).collect();
            let populations: Vec<f64> = ok.iter().map(|r| r.total_population).collect();
            let times: Vec<f64> = ok.iter().map(|r| r.time).collect();

            let std_energy = if energies.len() > 1 { Statistics::std_dev(energies.iter()) } else { 0.0 };

            statistics.push(AlgorithmStatistics {
                algorithm: algo.to_string(),
                num_runs: results.len(),
                num_failed: results.len() - ok.len(),
                num_within_budget: ok.iter().filter(|r| r.within_budget).count(),
                avg_energy: Statistics::mean(energies.iter()),
                best_energy: energies.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                worst_energy: energies.iter().cloned().fold(f64::INFINITY, f64::min),
                std_energy,
                avg_cost: Statistics::mean(costs.iter()),
                avg_population: Statistics::mean(populations.iter()),
                avg_time: Statistics::mean(times.iter()),
                total_time: times.iter().sum(),
            });
        }

        statistics.sort_by(|a, b| b.avg_energy.total_cmp(&a.avg_energy));
        statistics
    }

    /// Export results to CSV
    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        for result in &self.results {
            writer.serialize(result)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Export statistics to CSV
    pub fn export_statistics_csv<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        for stat in self.compute_statistics() {
            writer.serialize(stat)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Generate summary report
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("========================================\n");
        report.push_str("     Site Selection Benchmark Report\n");
        report.push_str("========================================\n");
        report.push_str(&format!("Generated: {}\n\n", Local::now().format("%Y-%m-%d %H:%M:%S")));

        report.push_str("Algorithm Performance Summary:\n");
        report.push_str("-".repeat(88).as_str());
        report.push('\n');
        report.push_str(&format!(
            "{:<12} {:>8} {:>10} {:>14} {:>14} {:>12} {:>12}\n",
            "Algorithm", "Runs", "In budget", "Avg Energy", "Best Energy", "Avg Cost", "Avg Time"
        ));
        report.push_str("-".repeat(88).as_str());
        report.push('\n');

        for stat in self.compute_statistics() {
            report.push_str(&format!(
                "{:<12} {:>8} {:>10} {:>14.2} {:>14.2} {:>12.0} {:>12.4}\n",
                stat.algorithm,
                format!("{}/{}", stat.num_runs - stat.num_failed, stat.num_runs),
                format!("{}", stat.num_within_budget),
                stat.avg_energy,
                stat.best_energy,
                stat.avg_cost,
                stat.avg_time
            ));
        }

        report.push_str("-".repeat(88).as_str());
        report.push('\n');

        let best = self
            .results
            .iter()
            .filter(|r| r.error.is_none() && r.within_budget)
            .max_by(|a, b| a.total_energy.total_cmp(&b.total_energy));
        if let Some(best) = best {
            report.push_str(&format!(
                "\nBest selection within budget: {:.2} kWh/day, {} sites, ${:.0} ({}, seed {})\n",
                best.total_energy, best.num_selected, best.total_cost, best.algorithm, best.seed
            ));
        }

        report
    }

    /// Get all results
    pub fn results(&self) -> &[AlgorithmResult] {
        &self.results
    }
}
