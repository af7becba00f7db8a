use na::DVector;

use super::{LinearSolveError, LinearSolver};
use crate::SymmetricBlockSparseMatrix;

/// Dense Cholesky factorization of the full Hessian.
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseSolver;

impl LinearSolver for DenseSolver {
    fn solve(
        &mut self,
        hessian: &SymmetricBlockSparseMatrix,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolveError> {
        let chol = hessian
            .to_dense()
            .cholesky()
            .ok_or(LinearSolveError::NotPositiveDefinite)?;
        Ok(chol.solve(rhs))
    }
}
