//! Heuristic site selectors.
//!
//! The greedy heuristic works directly on candidate costs and energies; the
//! annealing and tabu searches minimize a QUBO energy.

pub mod greedy;
pub mod annealing;
pub mod tabu;

pub use greedy::*;
pub use annealing::*;
pub use tabu::*;
