//! Selection vectors and the results mapped back onto candidate sites.

use serde::{Deserialize, Serialize};

use crate::instance::Candidate;

/// Binary selection over a candidate list, one entry per candidate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    bits: Vec<u8>,
}

impl Selection {
    /// All-zero selection of length `n`
    pub fn empty(n: usize) -> Self {
        Selection { bits: vec![0; n] }
    }

    pub fn from_bits(bits: Vec<u8>) -> Self {
        debug_assert!(bits.iter().all(|&b| b <= 1));
        Selection { bits }
    }

    /// Selection of length `n` with the given indices set. Out-of-range
    /// indices are ignored; callers validate them beforehand.
    pub fn from_indices(n: usize, indices: &[usize]) -> Self {
        let mut bits = vec![0; n];
        for &i in indices {
            if i < n {
                bits[i] = 1;
            }
        }
        Selection { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn is_selected(&self, i: usize) -> bool {
        self.bits[i] == 1
    }

    pub fn select(&mut self, i: usize) {
        self.bits[i] = 1;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b == 1).count()
    }

    /// Selected indices in ascending order
    pub fn indices(&self) -> Vec<usize> {
        (0..self.bits.len()).filter(|&i| self.bits[i] == 1).collect()
    }

    pub fn analyze(&self, candidates: &[Candidate], budget: f64) -> SolutionAnalysis {
        let mut analysis = SolutionAnalysis::default();
        for i in self.indices() {
            let c = &candidates[i];
            analysis.total_cost += c.cost;
            analysis.total_population += c.population_coverage;
            analysis.total_energy += c.energy;
            analysis.num_sites += 1;
        }
        analysis.within_budget = analysis.total_cost <= budget;
        analysis
    }
}

/// Aggregate figures of a selection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionAnalysis {
    pub total_cost: f64,
    pub total_population: f64,
    pub total_energy: f64,
    pub num_sites: usize,
    pub within_budget: bool,
}

/// A selected site as reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResult {
    pub lat: f64,
    pub lng: f64,
    pub cost: f64,
    pub energy: f64,
    pub population_coverage: f64,
    pub distance_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

impl From<&Candidate> for SiteResult {
    fn from(c: &Candidate) -> Self {
        SiteResult {
            lat: c.location.lat,
            lng: c.location.lng,
            cost: c.cost,
            energy: c.energy,
            population_coverage: c.population_coverage,
            distance_km: c.distance_km,
            site_id: c.site_id.clone(),
        }
    }
}

/// Outcome of one solve: selected sites in original candidate order plus
/// solver diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResult {
    pub sites: Vec<SiteResult>,
    pub algorithm: String,
    pub candidate_count: usize,
    pub analysis: SolutionAnalysis,
    /// `x'Qx` of the selection, when a QUBO was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    pub computation_time: f64,
}

impl SolveResult {
    pub fn empty(algorithm: &str) -> Self {
        SolveResult {
            sites: Vec::new(),
            algorithm: algorithm.to_string(),
            candidate_count: 0,
            analysis: SolutionAnalysis { within_budget: true, ..Default::default() },
            energy: None,
            iterations: None,
            computation_time: 0.0,
        }
    }

    pub fn from_selection(algorithm: &str, candidates: &[Candidate], selection: &Selection, budget: f64) -> Self {
        SolveResult {
            sites: selection.indices().into_iter().map(|i| SiteResult::from(&candidates[i])).collect(),
            algorithm: algorithm.to_string(),
            candidate_count: candidates.len(),
            analysis: selection.analyze(candidates, budget),
            energy: None,
            iterations: None,
            computation_time: 0.0,
        }
    }
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Solution ({})", self.algorithm)?;
        writeln!(f, "  Candidates: {}", self.candidate_count)?;
        writeln!(f, "  Selected sites: {}", self.analysis.num_sites)?;
        writeln!(f, "  Total cost: ${:.0}", self.analysis.total_cost)?;
        writeln!(f, "  Total population: {:.0}", self.analysis.total_population)?;
        writeln!(f, "  Total energy: {:.2} kWh/day", self.analysis.total_energy)?;
        writeln!(f, "  Within budget: {}", self.analysis.within_budget)?;
        if let Some(energy) = self.energy {
            writeln!(f, "  QUBO energy: {:.4}", energy)?;
        }
        if let Some(iter) = self.iterations {
            writeln!(f, "  Iterations: {}", iter)?;
        }
        writeln!(f, "  Time: {:.4}s", self.computation_time)
    }
}
