//! Planner configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes. Command line flags override the loaded values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::heuristics::annealing::AnnealingConfig;
use crate::heuristics::tabu::TabuConfig;
use crate::qubo::DEFAULT_DOWNSAMPLE_CAP;

/// Default wall-clock limit for one external solver call
pub const DEFAULT_EXTERNAL_TIMEOUT_MS: u64 = 60_000;

/// How to launch an out-of-process solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSolverConfig {
    pub program: String,
    /// Leading arguments, before the generated `--qubo_file ...` flags
    pub args: Vec<String>,
    pub timeout_ms: u64,
    /// Parent directory for per-call temporary files; system temp dir if unset
    pub work_dir: Option<PathBuf>,
}

impl ExternalSolverConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        ExternalSolverConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_ms: DEFAULT_EXTERNAL_TIMEOUT_MS,
            work_dir: None,
        }
    }

    pub fn exact() -> Self {
        ExternalSolverConfig::new("python3", &["gurobi_optimize.py"])
    }

    pub fn quantum() -> Self {
        ExternalSolverConfig::new("python3", &["quantum_optimize.py"])
    }
}

impl Default for ExternalSolverConfig {
    fn default() -> Self {
        ExternalSolverConfig::new("python3", &[])
    }
}

/// Fields given for a solver in a config file, laid over that solver's
/// defaults. Naming a different `program` drops the default script argument
/// unless `args` is given too.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SolverOverrides {
    program: Option<String>,
    args: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    work_dir: Option<PathBuf>,
}

impl SolverOverrides {
    fn apply(self, mut base: ExternalSolverConfig) -> ExternalSolverConfig {
        if let Some(program) = self.program {
            base.program = program;
            base.args = Vec::new();
        }
        if let Some(args) = self.args {
            base.args = args;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            base.timeout_ms = timeout_ms;
        }
        if self.work_dir.is_some() {
            base.work_dir = self.work_dir;
        }
        base
    }
}

fn exact_solver<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ExternalSolverConfig, D::Error> {
    SolverOverrides::deserialize(deserializer).map(|o| o.apply(ExternalSolverConfig::exact()))
}

fn quantum_solver<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ExternalSolverConfig, D::Error> {
    SolverOverrides::deserialize(deserializer).map(|o| o.apply(ExternalSolverConfig::quantum()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub annealing: AnnealingConfig,
    pub tabu: TabuConfig,
    #[serde(deserialize_with = "exact_solver")]
    pub exact: ExternalSolverConfig,
    #[serde(deserialize_with = "quantum_solver")]
    pub quantum: ExternalSolverConfig,
    /// Largest QUBO handed to an external solver before downsampling
    pub downsample_cap: usize,
    /// Cap on simultaneously running external solver processes
    pub max_concurrent_external: usize,
    /// Seed used when a request does not carry its own
    pub seed: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            annealing: AnnealingConfig::default(),
            tabu: TabuConfig::default(),
            exact: ExternalSolverConfig::exact(),
            quantum: ExternalSolverConfig::quantum(),
            downsample_cap: DEFAULT_DOWNSAMPLE_CAP,
            max_concurrent_external: 4,
            seed: 42,
        }
    }
}

impl PlannerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.annealing.max_iterations, 10_000);
        assert_eq!(config.annealing.initial_temperature, 20.0);
        assert_eq!(config.downsample_cap, 1000);
        assert_eq!(config.exact.timeout_ms, 60_000);
        assert_eq!(config.quantum.args, vec!["quantum_optimize.py".to_string()]);
    }

    #[test]
    fn test_partial_json() {
        let config: PlannerConfig = serde_json::from_str(
            r#"{"seed": 7, "annealing": {"cooling_rate": 0.99}, "exact": {"program": "/opt/solve", "timeout_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.annealing.cooling_rate, 0.99);
        assert_eq!(config.annealing.max_iterations, 10_000);
        assert_eq!(config.exact.program, "/opt/solve");
        assert!(config.exact.args.is_empty());
        assert_eq!(config.exact.timeout_ms, 500);
        assert_eq!(config.tabu.tenure, 10);
        assert_eq!(config.quantum, ExternalSolverConfig::quantum());
    }

    #[test]
    fn test_timeout_override_keeps_solver_script() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"exact": {"timeout_ms": 120000}, "quantum": {"work_dir": "/scratch"}}"#).unwrap();

        assert_eq!(config.exact.program, "python3");
        assert_eq!(config.exact.args, vec!["gurobi_optimize.py".to_string()]);
        assert_eq!(config.exact.timeout_ms, 120_000);
        assert_eq!(config.quantum.args, vec!["quantum_optimize.py".to_string()]);
        assert_eq!(config.quantum.work_dir, Some(PathBuf::from("/scratch")));
        assert_eq!(config.quantum.timeout_ms, DEFAULT_EXTERNAL_TIMEOUT_MS);
    }

    #[test]
    fn test_round_trip_keeps_solvers() {
        let config = PlannerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PlannerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
