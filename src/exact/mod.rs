//! Out-of-process exact and quantum solvers.
//!
//! Neither solver runs inside this crate. The bridge hands the QUBO to an
//! external program and the gate caps how many of those programs run at once.

pub mod bridge;
pub mod gate;

pub use bridge::*;
pub use gate::*;
