//! Semi-analytic primal (SAP) solver for discrete-time contact problems.
//!
//! A [`SapContactProblem`] gathers the per-clique mass matrices, the free motion velocities and a
//! set of compliant constraints (frictional contact, holonomic and limit constraints). The
//! [`SapSolver`] reformulates the problem as an unconstrained strongly convex minimization over
//! generalized velocities and solves it with Newton's method globalized by a line search.

mod block_sparse_matrix;
mod constraint;
pub mod constraints;
mod constraint_bundle;
mod contact_problem;
mod contact_problem_graph;
mod model;
mod partial_permutation;
mod results;
pub mod solver;

// Problem builders shared between unit tests, integration tests and benchmarks.
pub mod test_utils;

pub use block_sparse_matrix::*;
pub use constraint::*;
pub use constraint_bundle::*;
pub use constraints::*;
pub use contact_problem::*;
pub use contact_problem_graph::*;
pub use model::*;
pub use partial_permutation::*;
pub use results::*;
pub use solver::{
    LineSearch, LinearSolveError, LinearSolverType, SapSolver, SapSolverParameters, SolveResult,
    SolverStats, Status, Timings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("Index {index} is out of range for a domain of size {size}")]
    OutOfRange { index: usize, size: usize },
    #[error("Size mismatch error: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
    #[error("Mass matrix of clique {clique} is not symmetric positive definite")]
    NotPositiveDefinite { clique: usize },
    #[error("Error during the SAP solve: {result}")]
    SolveError {
        result: SolveResult,
        /// Convergence history up to the failure.
        stats: Box<SolverStats>,
    },
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Infinity norm of the given sequence of values.
pub(crate) fn inf_norm<I>(iter: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    iter.into_iter().map(f64::abs).fold(0.0, f64::max)
}
