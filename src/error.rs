//! Error taxonomy of the planner.
//!
//! Subproblem and master failures are kept apart so that callers can tell
//! an infeasible operating scenario from an investment problem that admits
//! no plan at all.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for planner operations.
pub type Result<T> = std::result::Result<T, PlanningError>;

/// Failure of a single operating subproblem solve.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The conic program could not be assembled or handed to the solver.
    #[error("could not set up the conic program: {0}")]
    Setup(String),

    /// The solver stopped without an optimality certificate.
    #[error("solver finished with status {status}")]
    NotOptimal { status: String },
}

/// Failure of the investment (master) problem.
#[derive(Debug, Error)]
pub enum MasterError {
    /// HiGHS rejected the model or an option.
    #[error("HiGHS call {call} failed")]
    Highs { call: &'static str },

    /// The MILP finished without a proven optimum.
    #[error("master problem finished with status {status}")]
    NotOptimal { status: String },
}

/// Failure while reading or validating a prepared study.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid study data: {0}")]
    Invalid(String),
}

/// Failure while persisting the iteration history.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("could not write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize run summary: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top level error reported to the caller of the decomposition.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("subproblem for scenario {scenario} failed at iteration {iteration}: {source}")]
    Subproblem {
        iteration: usize,
        scenario: usize,
        #[source]
        source: SolveError,
    },

    #[error("master problem failed at iteration {iteration}: {source}")]
    Master {
        iteration: usize,
        #[source]
        source: MasterError,
    },

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("could not build the scenario worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl PlanningError {
    /// Iteration at which the decomposition aborted, when the failure
    /// happened inside the loop.
    pub fn iteration(&self) -> Option<usize> {
        match self {
            PlanningError::Subproblem { iteration, .. }
            | PlanningError::Master { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Scenario that triggered the failure, if any.
    pub fn scenario(&self) -> Option<usize> {
        match self {
            PlanningError::Subproblem { scenario, .. } => Some(*scenario),
            _ => None,
        }
    }
}
