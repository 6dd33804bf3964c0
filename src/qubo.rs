//! QUBO construction for budget-constrained site selection.
//!
//! The matrix encodes, for a binary selection vector `x`:
//!
//! ```text
//! sum_i (C_i - alpha*P_i - gamma*E_i) x_i
//!   + theta  * (sum_i C_i x_i - B)^2
//!   + mu     * (sum_i x_i - K)^2
//!   + lambda * (M - sum_i P_i x_i)^2
//! ```
//!
//! Off-diagonal entries are written already doubled into both `Q[i][j]` and
//! `Q[j][i]`, so `x'Qx` weighs pairwise penalty terms twice as heavily as the
//! squared forms above. The constant part of the three penalties is folded
//! into `Q[0][0]`. All penalties are soft: a minimizer of `x'Qx` may violate
//! the budget, count or coverage targets.

use serde::{Deserialize, Serialize};

use crate::instance::Candidate;

/// Largest candidate count handed to an external backend
pub const DEFAULT_DOWNSAMPLE_CAP: usize = 1000;

/// Objective and penalty weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuboWeights {
    /// Population coverage reward
    pub alpha: f64,
    /// Energy capacity reward
    pub gamma: f64,
    /// Budget penalty
    pub theta: f64,
    /// Site count penalty
    pub mu: f64,
    /// Population coverage penalty
    pub lambda: f64,
}

impl Default for QuboWeights {
    fn default() -> Self {
        QuboWeights { alpha: 1e-1, gamma: 1e-1, theta: 1e-6, mu: 2.0, lambda: 1e-2 }
    }
}

/// Soft targets the penalties pull towards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuboTargets {
    /// Budget B
    pub budget: f64,
    /// Desired site count K
    pub max_count: u32,
    /// Desired population coverage M
    pub min_population: f64,
}

/// A named combination of weights and default count/coverage targets.
///
/// Dataset-driven and mesh-driven solves historically used different
/// defaults; both are kept side by side rather than merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuboPreset {
    pub name: &'static str,
    pub weights: QuboWeights,
    pub max_count: u32,
    pub min_population: f64,
}

impl QuboPreset {
    /// Sites filtered from a dataset: population and energy both rewarded
    pub fn dataset() -> Self {
        QuboPreset {
            name: "dataset",
            weights: QuboWeights::default(),
            max_count: 10,
            min_population: 15_000.0,
        }
    }

    /// Uniform mesh cells: population only enters through its penalty term
    pub fn mesh() -> Self {
        QuboPreset {
            name: "mesh",
            weights: QuboWeights { alpha: 0.0, ..QuboWeights::default() },
            max_count: 5,
            min_population: 0.0,
        }
    }

    /// Targets for a budget, with optional overrides of K and M
    pub fn targets(&self, budget: f64, max_count: Option<u32>, min_population: Option<f64>) -> QuboTargets {
        QuboTargets {
            budget,
            max_count: max_count.unwrap_or(self.max_count),
            min_population: min_population.unwrap_or(self.min_population),
        }
    }
}

/// Dense row-major `n x n` QUBO matrix
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Vec<Vec<f64>>")]
pub struct QuboMatrix {
    n: usize,
    data: Vec<f64>,
    /// Constant penalty part folded into `Q[0][0]`
    offset: f64,
}

impl QuboMatrix {
    pub fn zeros(n: usize) -> Self {
        QuboMatrix { n, data: vec![0.0; n * n], offset: 0.0 }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let n = rows.len();
        if rows.iter().any(|r| r.len() != n) {
            return None;
        }
        Some(QuboMatrix { n, data: rows.into_iter().flatten().collect(), offset: 0.0 })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    #[inline]
    fn add(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] += value;
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.n).map(|i| self.row(i).to_vec()).collect()
    }

    /// `x'Qx` for a binary vector
    pub fn energy(&self, x: &[u8]) -> f64 {
        let selected: Vec<usize> = (0..self.n).filter(|&i| x[i] == 1).collect();
        let mut e = 0.0;
        for &i in &selected {
            let row = self.row(i);
            for &j in &selected {
                e += row[j];
            }
        }
        e
    }

    /// Change of `x'Qx` when bit `i` of `x` is flipped, in O(n)
    pub fn flip_delta(&self, x: &[u8], i: usize) -> f64 {
        let mut coupling = self.get(i, i);
        for j in 0..self.n {
            if j != i && x[j] == 1 {
                coupling += self.get(i, j) + self.get(j, i);
            }
        }
        if x[i] == 1 { -coupling } else { coupling }
    }

    /// Keep every `k`-th row and column, `k = ceil(n / cap)`, so that at most
    /// `cap` candidates remain. Entries of the sampled candidates are copied
    /// unchanged. Returns `None` when the matrix already fits.
    pub fn downsample(&self, cap: usize) -> Option<Downsampled> {
        if cap == 0 || self.n <= cap {
            return None;
        }
        let stride = self.n.div_ceil(cap);
        let indices: Vec<usize> = (0..self.n).step_by(stride).collect();
        let m = indices.len();

        let mut reduced = QuboMatrix::zeros(m);
        reduced.offset = self.offset;
        for (a, &i) in indices.iter().enumerate() {
            for (b, &j) in indices.iter().enumerate() {
                reduced.set(a, b, self.get(i, j));
            }
        }

        Some(Downsampled { matrix: reduced, indices, stride })
    }
}

impl From<QuboMatrix> for Vec<Vec<f64>> {
    fn from(matrix: QuboMatrix) -> Self {
        matrix.to_rows()
    }
}

/// A strided sub-problem and the original index of each of its rows
#[derive(Debug, Clone)]
pub struct Downsampled {
    pub matrix: QuboMatrix,
    pub indices: Vec<usize>,
    pub stride: usize,
}

impl Downsampled {
    pub fn candidates(&self, candidates: &[Candidate]) -> Vec<Candidate> {
        self.indices.iter().map(|&i| candidates[i].clone()).collect()
    }
}

/// Builds the QUBO matrix and evaluates its unexpanded terms
#[derive(Debug, Clone, Copy)]
pub struct QuboBuilder {
    pub weights: QuboWeights,
    pub targets: QuboTargets,
}

impl QuboBuilder {
    pub fn new(weights: QuboWeights, targets: QuboTargets) -> Self {
        QuboBuilder { weights, targets }
    }

    pub fn from_preset(preset: &QuboPreset, budget: f64, max_count: Option<u32>, min_population: Option<f64>) -> Self {
        QuboBuilder::new(preset.weights, preset.targets(budget, max_count, min_population))
    }

    pub fn build(&self, candidates: &[Candidate]) -> QuboMatrix {
        let n = candidates.len();
        let mut q = QuboMatrix::zeros(n);
        if n == 0 {
            return q;
        }

        let QuboWeights { alpha, gamma, theta, mu, lambda } = self.weights;
        let b = self.targets.budget;
        let k = self.targets.max_count as f64;
        let m = self.targets.min_population;

        for (i, ci) in candidates.iter().enumerate() {
            let (c, p, e) = (ci.cost, ci.population_coverage, ci.energy);

            q.add(i, i, c - alpha * p - gamma * e);
            q.add(i, i, theta * (c * c - 2.0 * b * c));
            q.add(i, i, mu * (1.0 - 2.0 * k));
            q.add(i, i, lambda * (p * p - 2.0 * m * p));

            for (j, cj) in candidates.iter().enumerate() {
                if i == j {
                    continue;
                }
                // products first, so Q[i][j] and Q[j][i] round identically
                let value = 2.0 * theta * (c * cj.cost)
                    + 2.0 * mu
                    + 2.0 * lambda * (p * cj.population_coverage);
                q.add(i, j, value);
            }
        }

        q.offset = theta * b * b + mu * k * k + lambda * m * m;
        q.add(0, 0, q.offset);
        q
    }

    /// Linear objective: cost minus weighted population and energy
    pub fn objective(&self, candidates: &[Candidate], x: &[u8]) -> f64 {
        selected(candidates, x)
            .map(|c| c.cost - self.weights.alpha * c.population_coverage - self.weights.gamma * c.energy)
            .sum()
    }

    pub fn budget_penalty(&self, candidates: &[Candidate], x: &[u8]) -> f64 {
        let cost: f64 = selected(candidates, x).map(|c| c.cost).sum();
        self.weights.theta * (cost - self.targets.budget).powi(2)
    }

    pub fn count_penalty(&self, candidates: &[Candidate], x: &[u8]) -> f64 {
        let count = selected(candidates, x).count() as f64;
        self.weights.mu * (count - self.targets.max_count as f64).powi(2)
    }

    pub fn population_penalty(&self, candidates: &[Candidate], x: &[u8]) -> f64 {
        let population: f64 = selected(candidates, x).map(|c| c.population_coverage).sum();
        self.weights.lambda * (self.targets.min_population - population).powi(2)
    }

    /// Objective plus all three squared penalties
    pub fn total(&self, candidates: &[Candidate], x: &[u8]) -> f64 {
        self.objective(candidates, x)
            + self.budget_penalty(candidates, x)
            + self.count_penalty(candidates, x)
            + self.population_penalty(candidates, x)
    }
}

fn selected<'a>(candidates: &'a [Candidate], x: &'a [u8]) -> impl Iterator<Item = &'a Candidate> + 'a {
    candidates.iter().zip(x.iter()).filter(|(_, &bit)| bit == 1).map(|(c, _)| c)
}
