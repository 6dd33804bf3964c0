//! Error types for the site selection pipeline.

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Errors raised while validating a request or running a solver
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The request was rejected before any computation started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External solver exited with a nonzero status
    #[error("{solver} solver failed ({status}): {diagnostics}")]
    SolverFailed {
        solver: String,
        status: String,
        diagnostics: String,
    },

    /// External solver did not finish within its wall-clock budget and was killed
    #[error("{solver} solver timed out after {timeout_ms} ms")]
    SolverTimeout { solver: String, timeout_ms: u64 },

    /// External solver exited cleanly but produced no usable result record
    #[error("{solver} solver produced no valid result: {diagnostics}")]
    MalformedOutput { solver: String, diagnostics: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PlannerError {
    pub fn invalid(details: impl Into<String>) -> Self {
        PlannerError::InvalidInput(details.into())
    }

    /// True for every failure that originates in an external solver process
    pub fn is_solver_failure(&self) -> bool {
        matches!(
            self,
            PlannerError::SolverFailed { .. }
                | PlannerError::SolverTimeout { .. }
                | PlannerError::MalformedOutput { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PlannerError::SolverTimeout { .. })
    }
}
