use na::DVector;
use sprs::{FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};

use super::{LinearSolveError, LinearSolver};
use crate::SymmetricBlockSparseMatrix;

/// Scalar sparse LDLᵀ factorization with a reverse Cuthill-McKee ordering.
///
/// The symbolic factorization is computed on the first solve and only the numeric factorization
/// is updated afterwards.
#[derive(Default)]
pub struct SparseLdlSolver {
    factorization: Option<LdlNumeric<f64, usize>>,
}

impl std::fmt::Debug for SparseLdlSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseLdlSolver")
            .field("factorized", &self.factorization.is_some())
            .finish()
    }
}

impl SparseLdlSolver {
    pub fn new() -> Self {
        SparseLdlSolver::default()
    }
}

fn factorization_error(err: sprs::errors::LinalgError) -> LinearSolveError {
    LinearSolveError::FactorizationFailed(format!("{:?}", err))
}

impl LinearSolver for SparseLdlSolver {
    fn solve(
        &mut self,
        hessian: &SymmetricBlockSparseMatrix,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolveError> {
        let mat = hessian.to_sprs_csc();
        let ldl = match self.factorization.take() {
            Some(mut ldl) => {
                ldl.update(mat.view()).map_err(factorization_error)?;
                ldl
            }
            None => Ldl::new()
                .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
                .check_symmetry(SymmetryCheck::DontCheckSymmetry)
                .numeric(mat.view())
                .map_err(factorization_error)?,
        };

        // A positive definite matrix has a strictly positive D.
        if ldl.d().iter().any(|&d| !(d > 0.0)) {
            return Err(LinearSolveError::NotPositiveDefinite);
        }

        let x = ldl.solve(rhs.as_slice());
        self.factorization = Some(ldl);
        Ok(DVector::from_vec(x))
    }
}
