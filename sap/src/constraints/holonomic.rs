use na::{DMatrix, DVector, DVectorView};
use serde::{Deserialize, Serialize};

use crate::constraint::*;
use crate::Error;

/// Compliance of a holonomic constraint.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HolonomicParameters {
    /// Use `f64::INFINITY` to enforce the constraint in the near-rigid regime.
    pub stiffness: f64,
    pub dissipation_time_scale: f64,
    /// Near-rigid parameter bounding the regularization from below.
    pub beta: f64,
}

impl Default for HolonomicParameters {
    fn default() -> Self {
        HolonomicParameters {
            stiffness: f64::INFINITY,
            dissipation_time_scale: 0.0,
            beta: 1.0,
        }
    }
}

/// A single degree of freedom referenced by a coupler constraint.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CouplerDof {
    pub clique: usize,
    /// Number of velocities of `clique`.
    pub clique_num_velocities: usize,
    /// Index of the degree of freedom within `clique`.
    pub dof: usize,
    /// Position of the degree of freedom at the beginning of the step.
    pub position: f64,
}

/// Bilateral constraint `g(q) = 0` linearized at the beginning of the step.
///
/// Without impulse limits the impulse is unconstrained and the projection is the identity.
/// Impulse limits clamp each component of the impulse to `[lower, upper]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HolonomicConstraint {
    jacobian: ConstraintJacobian,
    g0: DVector<f64>,
    params: HolonomicParameters,
    impulse_lower: DVector<f64>,
    impulse_upper: DVector<f64>,
}

impl HolonomicConstraint {
    /// Creates a constraint with value `g0` and Jacobian `jacobian` with as many rows as `g0`
    /// has entries.
    pub fn new(
        jacobian: ConstraintJacobian,
        g0: DVector<f64>,
        params: HolonomicParameters,
    ) -> Result<Self, Error> {
        let k = g0.len();
        if k == 0 {
            return Err(Error::invalid_argument(
                "holonomic constraint must have at least one equation",
            ));
        }
        if jacobian.rows() != k {
            return Err(Error::SizeMismatch {
                expected: k,
                actual: jacobian.rows(),
            });
        }
        if g0.iter().any(|g| !g.is_finite()) {
            return Err(Error::invalid_argument("constraint value must be finite"));
        }
        check_compliance_parameters(params.stiffness, params.dissipation_time_scale, params.beta)?;
        Ok(HolonomicConstraint {
            jacobian,
            g0,
            params,
            impulse_lower: DVector::from_element(k, f64::NEG_INFINITY),
            impulse_upper: DVector::from_element(k, f64::INFINITY),
        })
    }

    /// Couples two degrees of freedom with `q₀ − ρ q₁ − offset = 0`, where `ρ` is the gear ratio.
    ///
    /// The two degrees of freedom may belong to the same clique.
    pub fn coupler(
        first: CouplerDof,
        second: CouplerDof,
        gear_ratio: f64,
        offset: f64,
        params: HolonomicParameters,
    ) -> Result<Self, Error> {
        for d in [&first, &second] {
            if d.dof >= d.clique_num_velocities {
                return Err(Error::OutOfRange {
                    index: d.dof,
                    size: d.clique_num_velocities,
                });
            }
        }
        if !gear_ratio.is_finite() || !offset.is_finite() {
            return Err(Error::invalid_argument(
                "gear ratio and offset must be finite",
            ));
        }

        let jacobian = if first.clique == second.clique {
            if first.dof == second.dof {
                return Err(Error::invalid_argument(format!(
                    "degree of freedom {} cannot be coupled to itself",
                    first.dof
                )));
            }
            if first.clique_num_velocities != second.clique_num_velocities {
                return Err(Error::SizeMismatch {
                    expected: first.clique_num_velocities,
                    actual: second.clique_num_velocities,
                });
            }
            let mut j = DMatrix::zeros(1, first.clique_num_velocities);
            j[(0, first.dof)] = 1.0;
            j[(0, second.dof)] = -gear_ratio;
            ConstraintJacobian::single(first.clique, j)
        } else {
            let mut j0 = DMatrix::zeros(1, first.clique_num_velocities);
            j0[(0, first.dof)] = 1.0;
            let mut j1 = DMatrix::zeros(1, second.clique_num_velocities);
            j1[(0, second.dof)] = -gear_ratio;
            ConstraintJacobian::pair(first.clique, j0, second.clique, j1)?
        };

        let g0 = first.position - gear_ratio * second.position - offset;
        HolonomicConstraint::new(jacobian, DVector::from_element(1, g0), params)
    }

    /// Limits each impulse component to the interval `[lower, upper]`.
    pub fn with_impulse_limits(
        mut self,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> Result<Self, Error> {
        let k = self.g0.len();
        for v in [&lower, &upper] {
            if v.len() != k {
                return Err(Error::SizeMismatch {
                    expected: k,
                    actual: v.len(),
                });
            }
        }
        if let Some((l, u)) = lower.iter().zip(upper.iter()).find(|(l, u)| !(l <= u)) {
            return Err(Error::invalid_argument(format!(
                "impulse lower limit {} exceeds upper limit {}",
                l, u
            )));
        }
        self.impulse_lower = lower;
        self.impulse_upper = upper;
        Ok(self)
    }

    /// Value of the constraint function at the beginning of the step.
    #[inline]
    pub fn constraint_function(&self) -> &DVector<f64> {
        &self.g0
    }

    #[inline]
    pub fn parameters(&self) -> &HolonomicParameters {
        &self.params
    }

    #[inline]
    pub fn impulse_lower_limits(&self) -> &DVector<f64> {
        &self.impulse_lower
    }

    #[inline]
    pub fn impulse_upper_limits(&self) -> &DVector<f64> {
        &self.impulse_upper
    }
}

impl SapConstraint for HolonomicConstraint {
    fn jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    fn calc_bias_term(&self, time_step: f64, _wi: f64) -> DVector<f64> {
        -&self.g0 / (time_step + self.params.dissipation_time_scale)
    }

    fn calc_diagonal_regularization(&self, time_step: f64, wi: f64) -> DVector<f64> {
        let HolonomicParameters {
            stiffness,
            dissipation_time_scale,
            beta,
        } = self.params;
        let r = near_rigid_regularization(time_step, wi, stiffness, dissipation_time_scale, beta);
        DVector::from_element(self.g0.len(), r)
    }

    fn project(
        &self,
        y: DVectorView<f64>,
        _r: DVectorView<f64>,
        gamma: &mut DVector<f64>,
        dpdy: Option<&mut DMatrix<f64>>,
    ) {
        // R is diagonal so the projection onto a box is a component-wise clamp.
        for i in 0..y.len() {
            gamma[i] = y[i].max(self.impulse_lower[i]).min(self.impulse_upper[i]);
        }
        if let Some(dpdy) = dpdy {
            dpdy.fill(0.0);
            for i in 0..y.len() {
                if self.impulse_lower[i] < y[i] && y[i] < self.impulse_upper[i] {
                    dpdy[(i, i)] = 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(c: &HolonomicConstraint, y: &[f64]) -> (DVector<f64>, DMatrix<f64>) {
        let n = y.len();
        let y = DVector::from_row_slice(y);
        let r = DVector::from_element(n, 1.0);
        let mut gamma = DVector::zeros(n);
        let mut dpdy = DMatrix::zeros(n, n);
        c.project(y.rows(0, n), r.rows(0, n), &mut gamma, Some(&mut dpdy));
        (gamma, dpdy)
    }

    #[test]
    fn unbounded_projection_is_identity() -> Result<(), Error> {
        let c = HolonomicConstraint::new(
            ConstraintJacobian::single(0, DMatrix::identity(2, 4)),
            DVector::from_row_slice(&[0.1, -0.2]),
            HolonomicParameters::default(),
        )?;
        let (gamma, dpdy) = project(&c, &[-3.0, 5.0]);
        assert_eq!(gamma, DVector::from_row_slice(&[-3.0, 5.0]));
        assert_eq!(dpdy, DMatrix::identity(2, 2));
        Ok(())
    }

    #[test]
    fn impulse_limits_clamp() -> Result<(), Error> {
        let c = HolonomicConstraint::new(
            ConstraintJacobian::single(0, DMatrix::identity(3, 3)),
            DVector::zeros(3),
            HolonomicParameters::default(),
        )?
        .with_impulse_limits(
            DVector::from_row_slice(&[-1.0, -1.0, 0.0]),
            DVector::from_row_slice(&[1.0, 2.0, 0.5]),
        )?;
        let (gamma, dpdy) = project(&c, &[-3.0, 0.5, 0.7]);
        assert_eq!(gamma, DVector::from_row_slice(&[-1.0, 0.5, 0.5]));
        assert_eq!(dpdy, DMatrix::from_diagonal(&DVector::from_row_slice(&[0.0, 1.0, 0.0])));
        Ok(())
    }

    #[test]
    fn bias_and_regularization() -> Result<(), Error> {
        let params = HolonomicParameters {
            stiffness: 1.0e6,
            dissipation_time_scale: 0.01,
            beta: 0.1,
        };
        let c = HolonomicConstraint::new(
            ConstraintJacobian::single(0, DMatrix::identity(1, 1)),
            DVector::from_element(1, 0.02),
            params,
        )?;
        let dt = 0.01;
        assert_relative_eq!(c.calc_bias_term(dt, 1.0)[0], -0.02 / 0.02);
        let r = c.calc_diagonal_regularization(dt, 1.0)[0];
        assert_relative_eq!(r, 1.0 / (dt * 1.0e6 * 0.02));

        let rigid = HolonomicConstraint::new(
            ConstraintJacobian::single(0, DMatrix::identity(1, 1)),
            DVector::from_element(1, 0.02),
            HolonomicParameters::default(),
        )?;
        let r = rigid.calc_diagonal_regularization(dt, 3.0)[0];
        assert_relative_eq!(r, 3.0 / (4.0 * std::f64::consts::PI.powi(2)));
        Ok(())
    }

    #[test]
    fn coupler_jacobian() -> Result<(), Error> {
        let first = CouplerDof {
            clique: 0,
            clique_num_velocities: 3,
            dof: 1,
            position: 0.5,
        };
        let second = CouplerDof {
            clique: 2,
            clique_num_velocities: 2,
            dof: 0,
            position: 0.1,
        };
        let c = HolonomicConstraint::coupler(first, second, 2.0, 0.2, Default::default())?;
        assert_eq!(c.num_cliques(), 2);
        assert_relative_eq!(c.constraint_function()[0], 0.5 - 0.2 - 0.2);
        let j = c.jacobian();
        assert_eq!(j.block_for(0), Some(&DMatrix::from_row_slice(1, 3, &[0.0, 1.0, 0.0])));
        assert_eq!(j.block_for(2), Some(&DMatrix::from_row_slice(1, 2, &[-2.0, 0.0])));

        let same_clique = CouplerDof { clique: 0, dof: 2, ..first };
        let c = HolonomicConstraint::coupler(first, same_clique, 0.5, 0.0, Default::default())?;
        assert_eq!(c.num_cliques(), 1);
        assert_eq!(
            c.jacobian().first().matrix,
            DMatrix::from_row_slice(1, 3, &[0.0, 1.0, -0.5])
        );
        Ok(())
    }

    #[test]
    fn invalid_construction() {
        let jacobian = ConstraintJacobian::single(0, DMatrix::identity(2, 2));
        assert!(matches!(
            HolonomicConstraint::new(jacobian.clone(), DVector::zeros(3), Default::default()),
            Err(Error::SizeMismatch { expected: 3, actual: 2 })
        ));
        let bad = HolonomicParameters {
            dissipation_time_scale: -1.0,
            ..Default::default()
        };
        assert!(HolonomicConstraint::new(jacobian.clone(), DVector::zeros(2), bad).is_err());

        let c = HolonomicConstraint::new(jacobian, DVector::zeros(2), Default::default()).unwrap();
        assert!(c
            .with_impulse_limits(
                DVector::from_row_slice(&[0.0, 2.0]),
                DVector::from_row_slice(&[1.0, 1.0])
            )
            .is_err());
    }
}
