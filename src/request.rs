//! Request and response shapes exchanged with the calling layer.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo::GeoPoint;
use crate::instance::{Candidate, CellProfile};
use crate::qubo::QuboMatrix;
use crate::solution::{SiteResult, SolveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Energy/cost ratio heuristic, hard budget
    Greedy,
    /// Simulated annealing on the QUBO, soft budget
    Annealing,
    /// Tabu search on the QUBO
    Tabu,
    /// External exact QUBO solver
    Exact,
    /// External quantum-annealing solver
    Quantum,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Greedy => "greedy",
            Algorithm::Annealing => "annealing",
            Algorithm::Tabu => "tabu",
            Algorithm::Exact => "exact",
            Algorithm::Quantum => "quantum",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One site selection request.
///
/// The region is kept as a plain list so a wrong vertex count is reported as
/// invalid input rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub region: Vec<GeoPoint>,
    pub budget: f64,
    #[serde(default)]
    pub population_center: Option<GeoPoint>,
    pub algorithm: Algorithm,
    /// Desired site count
    #[serde(default, rename = "K")]
    pub k: Option<u32>,
    /// Desired population coverage
    #[serde(default, rename = "M")]
    pub m: Option<f64>,
    /// Required when no site dataset is supplied
    #[serde(default)]
    pub cell_profile: Option<CellProfile>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SolveRequest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveResponse {
    pub sites: Vec<SiteResult>,
}

impl From<SolveResult> for SolveResponse {
    fn from(result: SolveResult) -> Self {
        SolveResponse { sites: result.sites }
    }
}

/// QUBO export: the matrix and the candidates its rows refer to
#[derive(Debug, Clone, Serialize)]
pub struct QuboExport {
    #[serde(rename = "Q")]
    pub q: QuboMatrix,
    pub candidates: Vec<Candidate>,
    pub budget: f64,
}
