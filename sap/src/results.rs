use na::{DVector, DVectorView};

use crate::{SapContactProblem, SolverStats};

/// Solution of a contact problem.
///
/// Constraint space quantities are stacked in the order constraints were added to the problem.
#[derive(Clone, Debug, PartialEq)]
pub struct SapSolverResults {
    /// Generalized velocities at the next time step.
    pub v: DVector<f64>,
    /// Constraint impulses.
    pub gamma: DVector<f64>,
    /// Constraint velocities.
    pub vc: DVector<f64>,
    /// Generalized impulses `Jᵀγ`.
    pub tau: DVector<f64>,
    pub time_step: f64,
    pub stats: SolverStats,
    /// Offset of each constraint in `gamma` and `vc` plus one trailing entry.
    offsets: Vec<usize>,
}

impl SapSolverResults {
    pub(crate) fn new(
        problem: &SapContactProblem,
        v: DVector<f64>,
        gamma: DVector<f64>,
        vc: DVector<f64>,
        tau: DVector<f64>,
        stats: SolverStats,
    ) -> Self {
        let mut offsets = Vec::with_capacity(problem.num_constraints() + 1);
        offsets.push(0);
        let mut offset = 0;
        for c in problem.constraints() {
            offset += c.num_constraint_equations();
            offsets.push(offset);
        }
        debug_assert_eq!(offset, gamma.len());

        SapSolverResults {
            v,
            gamma,
            vc,
            tau,
            time_step: problem.time_step(),
            stats,
            offsets,
        }
    }

    /// Results for a problem without constraints where all cliques move freely.
    pub(crate) fn unconstrained(problem: &SapContactProblem) -> Self {
        Self::new(
            problem,
            problem.v_star().clone(),
            DVector::zeros(0),
            DVector::zeros(0),
            DVector::zeros(problem.num_velocities()),
            SolverStats::default(),
        )
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of Newton iterations taken by the solver.
    #[inline]
    pub fn iterations(&self) -> u32 {
        self.stats.num_iterations
    }

    /// Impulse of the `i`-th constraint.
    ///
    /// # Panics
    ///
    /// This function panics if `i` is not a valid constraint index.
    pub fn constraint_impulse(&self, i: usize) -> DVectorView<'_, f64> {
        let (start, n) = self.range(i);
        self.gamma.rows(start, n)
    }

    /// Velocity of the `i`-th constraint.
    pub fn constraint_velocity(&self, i: usize) -> DVectorView<'_, f64> {
        let (start, n) = self.range(i);
        self.vc.rows(start, n)
    }

    /// Average force `γ / δt` applied by the `i`-th constraint over the time step.
    pub fn constraint_force(&self, i: usize) -> DVector<f64> {
        self.constraint_impulse(i) / self.time_step
    }

    fn range(&self, i: usize) -> (usize, usize) {
        assert!(i < self.num_constraints());
        (self.offsets[i], self.offsets[i + 1] - self.offsets[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::Error;
    use approx::assert_relative_eq;

    #[test]
    fn constraint_slices() -> Result<(), Error> {
        let problem = make_two_cliques_with_limits_problem()?;
        let n = problem.num_constraint_equations();
        let gamma = DVector::from_fn(n, |i, _| i as f64 + 1.0);
        let vc = -&gamma;
        let results = SapSolverResults::new(
            &problem,
            problem.v_star().clone(),
            gamma,
            vc,
            DVector::zeros(problem.num_velocities()),
            SolverStats::default(),
        );
        assert_eq!(results.num_constraints(), 2);
        // The first limit has both bounds finite and the second only an upper bound.
        assert_eq!(results.constraint_impulse(0).as_slice(), &[1.0, 2.0]);
        assert_eq!(results.constraint_impulse(1).as_slice(), &[3.0]);
        assert_eq!(results.constraint_velocity(1)[0], -3.0);
        assert_relative_eq!(results.constraint_force(1)[0], 3.0 / TIME_STEP);
        Ok(())
    }

    #[test]
    fn unconstrained() -> Result<(), Error> {
        let problem = SapContactProblem::new(
            TIME_STEP,
            vec![na::DMatrix::identity(2, 2)],
            DVector::from_row_slice(&[1.0, -1.0]),
        )?;
        let results = SapSolverResults::unconstrained(&problem);
        assert_eq!(results.num_constraints(), 0);
        assert_eq!(&results.v, problem.v_star());
        assert_eq!(results.tau, DVector::zeros(2));
        assert_eq!(results.iterations(), 0);
        Ok(())
    }
}
