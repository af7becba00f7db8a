use lazycell::LazyCell;
use na::{DMatrix, DVector};

use crate::{ContactProblemGraph, Error, SapConstraint};

/// A discrete-time contact problem.
///
/// The unconstrained dynamics are given by the block diagonal, symmetric positive definite
/// dynamics matrix `A` with one block per clique and the free motion velocities `v*`, such that
/// without constraints the next step velocities satisfy `A (v − v*) = 0`. Constraints couple at
/// most two cliques each.
#[derive(Debug)]
pub struct SapContactProblem {
    time_step: f64,
    a: Vec<DMatrix<f64>>,
    v_star: DVector<f64>,
    /// Offset of each clique's velocities in `v_star` plus one trailing entry.
    velocity_starts: Vec<usize>,
    constraints: Vec<Box<dyn SapConstraint>>,
    graph: LazyCell<ContactProblemGraph>,
}

impl SapContactProblem {
    pub fn new(time_step: f64, a: Vec<DMatrix<f64>>, v_star: DVector<f64>) -> Result<Self, Error> {
        if !(time_step > 0.0) || !time_step.is_finite() {
            return Err(Error::invalid_argument(format!(
                "time step must be strictly positive, got {}",
                time_step
            )));
        }

        let mut velocity_starts = Vec::with_capacity(a.len() + 1);
        let mut nv = 0;
        velocity_starts.push(0);
        for (clique, ac) in a.iter().enumerate() {
            if !ac.is_square() {
                return Err(Error::invalid_argument(format!(
                    "dynamics matrix of clique {} is not square",
                    clique
                )));
            }
            let tol = 1e-12 * ac.amax().max(1.0);
            if (ac - ac.transpose()).amax() > tol || ac.clone().cholesky().is_none() {
                return Err(Error::NotPositiveDefinite { clique });
            }
            nv += ac.nrows();
            velocity_starts.push(nv);
        }

        if v_star.len() != nv {
            return Err(Error::SizeMismatch {
                expected: nv,
                actual: v_star.len(),
            });
        }

        Ok(SapContactProblem {
            time_step,
            a,
            v_star,
            velocity_starts,
            constraints: Vec::new(),
            graph: LazyCell::new(),
        })
    }

    /// Adds a constraint to the problem and returns its index.
    ///
    /// Fails if the constraint references a clique outside of this problem or if one of its
    /// Jacobian blocks does not match the number of velocities of its clique.
    pub fn add_constraint(&mut self, constraint: Box<dyn SapConstraint>) -> Result<usize, Error> {
        for block in constraint.jacobian().blocks() {
            if block.clique >= self.num_cliques() {
                return Err(Error::OutOfRange {
                    index: block.clique,
                    size: self.num_cliques(),
                });
            }
            let nv = self.num_velocities_of(block.clique);
            if block.matrix.ncols() != nv {
                return Err(Error::SizeMismatch {
                    expected: nv,
                    actual: block.matrix.ncols(),
                });
            }
        }
        if constraint.num_constraint_equations() == 0 {
            return Err(Error::invalid_argument(
                "constraint must have at least one equation",
            ));
        }

        self.constraints.push(constraint);
        self.graph = LazyCell::new();
        Ok(self.constraints.len() - 1)
    }

    #[inline]
    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    #[inline]
    pub fn num_cliques(&self) -> usize {
        self.a.len()
    }

    /// Total number of generalized velocities.
    #[inline]
    pub fn num_velocities(&self) -> usize {
        self.v_star.len()
    }

    #[inline]
    pub fn num_velocities_of(&self, clique: usize) -> usize {
        self.a[clique].nrows()
    }

    /// Offset of the first velocity of `clique` in the full velocity vector.
    #[inline]
    pub fn velocity_start(&self, clique: usize) -> usize {
        self.velocity_starts[clique]
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_constraint_equations(&self) -> usize {
        self.constraints
            .iter()
            .map(|c| c.num_constraint_equations())
            .sum()
    }

    #[inline]
    pub fn constraint(&self, i: usize) -> &dyn SapConstraint {
        self.constraints[i].as_ref()
    }

    pub fn constraints(&self) -> impl Iterator<Item = &dyn SapConstraint> + '_ {
        self.constraints.iter().map(|c| c.as_ref())
    }

    /// Per-clique blocks of the dynamics matrix.
    #[inline]
    pub fn dynamics_matrix(&self) -> &[DMatrix<f64>] {
        &self.a
    }

    #[inline]
    pub fn v_star(&self) -> &DVector<f64> {
        &self.v_star
    }

    /// Graph of cliques coupled by the constraints of this problem.
    pub fn graph(&self) -> &ContactProblemGraph {
        self.graph.borrow_with(|| {
            let mut graph = ContactProblemGraph::new(self.num_cliques());
            for c in self.constraints.iter() {
                // Cliques were validated when the constraint was added.
                graph.push_constraint(
                    c.first_clique(),
                    c.second_clique(),
                    c.num_constraint_equations(),
                );
            }
            graph
        })
    }

    /// Momentum cost `½ (v − v*)ᵀ A (v − v*)` at the full velocity vector `v`.
    pub fn calc_momentum_cost(&self, v: &DVector<f64>) -> f64 {
        assert_eq!(v.len(), self.num_velocities());
        self.a
            .iter()
            .enumerate()
            .map(|(c, ac)| {
                let start = self.velocity_start(c);
                let dv = v.rows(start, ac.nrows()) - self.v_star.rows(start, ac.nrows());
                0.5 * dv.dot(&(ac * &dv))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConstraintJacobian, LimitConstraint};

    fn make_problem() -> Result<SapContactProblem, Error> {
        let a = vec![
            DMatrix::identity(2, 2) * 2.0,
            DMatrix::identity(1, 1),
            DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 1.0]),
        ];
        SapContactProblem::new(1e-3, a, DVector::from_row_slice(&[1., 2., 3., 4., 5., 6.]))
    }

    #[test]
    fn sizes_and_offsets() -> Result<(), Error> {
        let problem = make_problem()?;
        assert_eq!(problem.num_cliques(), 3);
        assert_eq!(problem.num_velocities(), 6);
        assert_eq!(problem.num_velocities_of(2), 3);
        assert_eq!(problem.velocity_start(1), 2);
        assert_eq!(problem.velocity_start(2), 3);
        assert_eq!(problem.num_constraints(), 0);
        assert_eq!(problem.graph().num_clusters(), 0);
        Ok(())
    }

    #[test]
    fn graph_is_rebuilt_after_adding_constraints() -> Result<(), Error> {
        let mut problem = make_problem()?;
        let limit = LimitConstraint::new(2, 0, 3, 0.0, -1.0, 1.0, Default::default())?;
        assert_eq!(problem.add_constraint(Box::new(limit))?, 0);
        assert_eq!(problem.graph().num_constraints(), 1);

        let jacobian = ConstraintJacobian::pair(
            0,
            DMatrix::from_element(1, 2, 1.0),
            2,
            DMatrix::from_element(1, 3, -1.0),
        )?;
        let holonomic = crate::HolonomicConstraint::new(
            jacobian,
            DVector::zeros(1),
            Default::default(),
        )?;
        assert_eq!(problem.add_constraint(Box::new(holonomic))?, 1);
        let graph = problem.graph();
        assert_eq!(graph.num_constraints(), 2);
        assert_eq!(graph.num_clusters(), 2);
        assert_eq!(graph.num_constraint_equations(), 3);
        assert_eq!(problem.num_constraint_equations(), 3);
        Ok(())
    }

    #[test]
    fn rejects_invalid_input() -> Result<(), Error> {
        assert!(SapContactProblem::new(0.0, vec![], DVector::zeros(0)).is_err());
        assert!(matches!(
            SapContactProblem::new(0.1, vec![DMatrix::identity(2, 2)], DVector::zeros(3)),
            Err(Error::SizeMismatch { expected: 2, actual: 3 })
        ));
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            SapContactProblem::new(0.1, vec![indefinite], DVector::zeros(2)),
            Err(Error::NotPositiveDefinite { clique: 0 })
        ));

        let mut problem = make_problem()?;
        let wrong_columns = LimitConstraint::new(1, 0, 2, 0.0, -1.0, 1.0, Default::default())?;
        assert!(matches!(
            problem.add_constraint(Box::new(wrong_columns)),
            Err(Error::SizeMismatch { expected: 1, actual: 2 })
        ));
        let wrong_clique = LimitConstraint::new(5, 0, 1, 0.0, -1.0, 1.0, Default::default())?;
        assert!(matches!(
            problem.add_constraint(Box::new(wrong_clique)),
            Err(Error::OutOfRange { index: 5, size: 3 })
        ));
        assert_eq!(problem.num_constraints(), 0);
        Ok(())
    }

    #[test]
    fn momentum_cost() -> Result<(), Error> {
        let problem = make_problem()?;
        assert_eq!(problem.calc_momentum_cost(problem.v_star()), 0.0);
        let mut v = problem.v_star().clone();
        v[0] += 1.0;
        v[3] += 1.0;
        assert!((problem.calc_momentum_cost(&v) - 2.0).abs() < 1e-14);
        Ok(())
    }
}
