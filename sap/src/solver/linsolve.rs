//! Factorizations of the Newton system `H dv = −∇ℓ`.

mod dense;
mod sparse_ldl;
mod supernodal;

pub use dense::DenseSolver;
pub use sparse_ldl::SparseLdlSolver;
pub use supernodal::SupernodalSolver;

use na::DVector;
use thiserror::Error;

use super::LinearSolverType;
use crate::SymmetricBlockSparseMatrix;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum LinearSolveError {
    #[error("Newton system is not positive definite")]
    NotPositiveDefinite,
    #[error("Factorization failed: {0}")]
    FactorizationFailed(String),
}

/// A direct solver for symmetric positive definite systems.
///
/// Solvers may keep state between calls, such as a symbolic analysis, under the assumption that
/// the sparsity structure of the matrix does not change.
pub trait LinearSolver {
    fn solve(
        &mut self,
        hessian: &SymmetricBlockSparseMatrix,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolveError>;
}

/// Creates the linear solver for a system with `num_velocities` unknowns.
pub(crate) fn make_linear_solver(
    solver_type: LinearSolverType,
    dense_size_threshold: usize,
    num_velocities: usize,
) -> Box<dyn LinearSolver> {
    let solver_type = match solver_type {
        LinearSolverType::Auto if num_velocities <= dense_size_threshold => LinearSolverType::Dense,
        LinearSolverType::Auto => LinearSolverType::Supernodal,
        other => other,
    };
    log::trace!(
        "Using {:?} linear solver for {} velocities",
        solver_type,
        num_velocities
    );
    match solver_type {
        LinearSolverType::Dense | LinearSolverType::Auto => Box::new(DenseSolver),
        LinearSolverType::Supernodal => Box::new(SupernodalSolver::new()),
        LinearSolverType::SparseLdl => Box::new(SparseLdlSolver::new()),
    }
}
