//! Microgrid Site Planner Library
//!
//! Selects a subset of candidate solar microgrid sites inside a quadrilateral
//! region, maximizing energy and population coverage under a budget. The
//! problem is expressed as a QUBO (quadratic unconstrained binary
//! optimization) matrix.
//!
//! # Features
//!
//! - Candidate generation by filtering a site dataset or meshing the region
//! - QUBO construction with soft budget, site count and coverage penalties
//! - Greedy energy/cost heuristic with a hard budget
//! - Simulated annealing and tabu search on the QUBO
//! - Delegation to external exact or quantum solver programs, with timeout
//!   and a cap on concurrent processes
//! - Benchmarking across algorithms and seeds
//!
//! # Example
//!
//! ```no_run
//! use microgrid_qubo::instance::SiteDataset;
//! use microgrid_qubo::orchestrator::SolveOrchestrator;
//! use microgrid_qubo::request::SolveRequest;
//!
//! let dataset = SiteDataset::from_file("sites.csv").unwrap();
//! let request = SolveRequest::from_file("request.json").unwrap();
//!
//! let result = SolveOrchestrator::default().solve(&request, Some(&dataset)).unwrap();
//! println!("{}", result);
//! ```

pub mod error;
pub mod geo;
pub mod instance;
pub mod qubo;
pub mod solution;
pub mod heuristics;
pub mod exact;
pub mod request;
pub mod config;
pub mod orchestrator;
pub mod benchmark;

pub use error::{PlannerError, Result};
pub use instance::{Candidate, SiteDataset};
pub use orchestrator::SolveOrchestrator;
pub use request::{Algorithm, SolveRequest, SolveResponse};
pub use solution::SolveResult;
