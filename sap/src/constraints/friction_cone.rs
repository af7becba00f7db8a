use na::{DMatrix, DVector, DVectorView, Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::constraint::*;
use crate::Error;

/// Regularizes the norm of the tangential impulse so that its gradient is defined everywhere.
const SOFT_NORM_TOLERANCE: f64 = 1e-7;

/// Parameters of a compliant frictional contact.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrictionConeParameters {
    /// Coefficient of friction.
    pub mu: f64,
    /// Contact stiffness. Use `f64::INFINITY` to model a rigid contact.
    pub stiffness: f64,
    /// Hunt-Crossley style dissipation time scale.
    pub dissipation_time_scale: f64,
    /// Near-rigid parameter bounding the normal regularization from below.
    pub beta: f64,
    /// Ratio between the tangential regularization and the Delassus approximation. This
    /// parameterizes the regularized friction, i.e. the amount of slip allowed during stiction.
    pub sigma: f64,
}

impl Default for FrictionConeParameters {
    fn default() -> Self {
        FrictionConeParameters {
            mu: 0.5,
            stiffness: f64::INFINITY,
            dissipation_time_scale: 0.0,
            beta: 1.0,
            sigma: 1.0e-3,
        }
    }
}

/// Frictional contact constraint.
///
/// The constraint has three equations ordered as two tangential components followed by the
/// normal component. Its impulse is constrained to lie in the friction cone
/// `‖γt‖ ≤ μ γn`.
#[derive(Clone, Debug, PartialEq)]
pub struct FrictionConeConstraint {
    jacobian: ConstraintJacobian,
    /// Signed distance at the beginning of the step, negative when penetrating.
    phi0: f64,
    params: FrictionConeParameters,
}

impl FrictionConeConstraint {
    pub fn new(
        jacobian: ConstraintJacobian,
        phi0: f64,
        params: FrictionConeParameters,
    ) -> Result<Self, Error> {
        if jacobian.rows() != 3 {
            return Err(Error::SizeMismatch {
                expected: 3,
                actual: jacobian.rows(),
            });
        }
        if !(params.mu >= 0.0) || !params.mu.is_finite() {
            return Err(Error::invalid_argument(format!(
                "friction coefficient must be non-negative, got {}",
                params.mu
            )));
        }
        if !(params.sigma > 0.0) || !params.sigma.is_finite() {
            return Err(Error::invalid_argument(format!(
                "tangential regularization factor must be strictly positive, got {}",
                params.sigma
            )));
        }
        if !phi0.is_finite() {
            return Err(Error::invalid_argument("signed distance must be finite"));
        }
        check_compliance_parameters(params.stiffness, params.dissipation_time_scale, params.beta)?;
        Ok(FrictionConeConstraint {
            jacobian,
            phi0,
            params,
        })
    }

    #[inline]
    pub fn mu(&self) -> f64 {
        self.params.mu
    }

    #[inline]
    pub fn phi0(&self) -> f64 {
        self.phi0
    }

    #[inline]
    pub fn parameters(&self) -> &FrictionConeParameters {
        &self.params
    }
}

impl SapConstraint for FrictionConeConstraint {
    fn jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    fn calc_bias_term(&self, time_step: f64, _wi: f64) -> DVector<f64> {
        let vn_hat = -self.phi0 / (time_step + self.params.dissipation_time_scale);
        DVector::from_vec(vec![0.0, 0.0, vn_hat])
    }

    fn calc_diagonal_regularization(&self, time_step: f64, wi: f64) -> DVector<f64> {
        let FrictionConeParameters {
            stiffness,
            dissipation_time_scale,
            beta,
            sigma,
            ..
        } = self.params;
        let rn = near_rigid_regularization(time_step, wi, stiffness, dissipation_time_scale, beta);
        let rt = sigma * wi;
        DVector::from_vec(vec![rt, rt, rn])
    }

    fn project(
        &self,
        y: DVectorView<f64>,
        r: DVectorView<f64>,
        gamma: &mut DVector<f64>,
        dpdy: Option<&mut DMatrix<f64>>,
    ) {
        let mu = self.params.mu;
        let (rt, rn) = (r[0], r[2]);
        // The boundary between sliding and separation depends on the metric defined by R.
        let mu_hat = mu * rt / rn;

        let yt = Vector2::new(y[0], y[1]);
        let yn = y[2];
        let yr = (yt.norm_squared() + SOFT_NORM_TOLERANCE * SOFT_NORM_TOLERANCE).sqrt();
        let that = yt / yr;

        if yr <= mu * yn {
            // Stiction.
            gamma.copy_from(&y);
            if let Some(dpdy) = dpdy {
                dpdy.fill_with_identity();
            }
        } else if yn > -mu_hat * yr {
            // Sliding: projection onto the boundary of the cone.
            let factor = 1.0 / (1.0 + mu * mu_hat);
            let gn = (yn + mu_hat * yr) * factor;
            let gt = that * (mu * gn);
            gamma[0] = gt[0];
            gamma[1] = gt[1];
            gamma[2] = gn;

            if let Some(dpdy) = dpdy {
                let p_perp = (Matrix2::identity() - that * that.transpose()) / yr;
                let dgn_dyt = that * (mu_hat * factor);
                let dgn_dyn = factor;
                let dgt_dyt = (that * dgn_dyt.transpose() + p_perp * gn) * mu;
                let dgt_dyn = that * (mu * dgn_dyn);

                dpdy.fill(0.0);
                dpdy.fixed_view_mut::<2, 2>(0, 0).copy_from(&dgt_dyt);
                dpdy.fixed_view_mut::<2, 1>(0, 2).copy_from(&dgt_dyn);
                dpdy.fixed_view_mut::<1, 2>(2, 0).tr_copy_from(&dgn_dyt);
                dpdy[(2, 2)] = dgn_dyn;
            }
        } else {
            // Separation.
            gamma.fill(0.0);
            if let Some(dpdy) = dpdy {
                dpdy.fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_constraint(mu: f64) -> FrictionConeConstraint {
        let jacobian = ConstraintJacobian::single(0, DMatrix::identity(3, 3));
        FrictionConeConstraint::new(
            jacobian,
            0.0,
            FrictionConeParameters {
                mu,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn project(
        c: &FrictionConeConstraint,
        y: [f64; 3],
        r: [f64; 3],
    ) -> (DVector<f64>, DMatrix<f64>) {
        let y = DVector::from_row_slice(&y);
        let r = DVector::from_row_slice(&r);
        let mut gamma = DVector::zeros(3);
        let mut dpdy = DMatrix::zeros(3, 3);
        c.project(y.rows(0, 3), r.rows(0, 3), &mut gamma, Some(&mut dpdy));
        (gamma, dpdy)
    }

    #[test]
    fn invalid_parameters() {
        let jacobian = ConstraintJacobian::single(0, DMatrix::identity(3, 3));
        let bad_mu = FrictionConeParameters {
            mu: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            FrictionConeConstraint::new(jacobian.clone(), 0.0, bad_mu),
            Err(Error::InvalidArgument { .. })
        ));
        let bad_stiffness = FrictionConeParameters {
            stiffness: 0.0,
            ..Default::default()
        };
        assert!(FrictionConeConstraint::new(jacobian.clone(), 0.0, bad_stiffness).is_err());
        let bad_rows = ConstraintJacobian::single(0, DMatrix::identity(2, 3));
        assert!(matches!(
            FrictionConeConstraint::new(bad_rows, 0.0, FrictionConeParameters::default()),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn regularization_and_bias() {
        let jacobian = ConstraintJacobian::single(0, DMatrix::identity(3, 3));
        let params = FrictionConeParameters {
            mu: 0.5,
            stiffness: 1.0e4,
            dissipation_time_scale: 0.1,
            beta: 1.0,
            sigma: 1.0e-3,
        };
        let c = FrictionConeConstraint::new(jacobian, -0.01, params).unwrap();
        let dt = 0.01;
        let wi = 2.0;
        let r = c.calc_diagonal_regularization(dt, wi);
        let compliant = 1.0 / (dt * 1.0e4 * (dt + 0.1));
        let near_rigid = wi / (4.0 * std::f64::consts::PI.powi(2));
        assert_relative_eq!(r[2], compliant.max(near_rigid));
        assert_relative_eq!(r[0], 2.0e-3);
        assert_relative_eq!(r[1], 2.0e-3);
        let v_hat = c.calc_bias_term(dt, wi);
        assert_relative_eq!(v_hat[2], 0.01 / (dt + 0.1));
        assert_eq!(v_hat[0], 0.0);
    }

    #[test]
    fn projection_regions() {
        let c = make_constraint(0.5);
        let r = [1.0, 1.0, 1.0];

        // Inside the cone.
        let (gamma, dpdy) = project(&c, [0.1, 0.0, 1.0], r);
        assert_relative_eq!(gamma, DVector::from_row_slice(&[0.1, 0.0, 1.0]));
        assert_relative_eq!(dpdy, DMatrix::identity(3, 3));

        // Inside the polar cone.
        let (gamma, dpdy) = project(&c, [0.1, 0.2, -2.0], r);
        assert_eq!(gamma.norm(), 0.0);
        assert_eq!(dpdy.norm(), 0.0);

        // Sliding: the result lies on the boundary of the cone.
        let (gamma, _) = project(&c, [3.0, 4.0, 1.0], r);
        let gt = (gamma[0] * gamma[0] + gamma[1] * gamma[1]).sqrt();
        assert!(gamma[2] > 0.0);
        assert_relative_eq!(gt, 0.5 * gamma[2], max_relative = 1e-6);
        // The tangential impulse is aligned with the tangential part of y.
        assert_relative_eq!(gamma[0] / gamma[1], 0.75, max_relative = 1e-6);
    }

    #[test]
    fn projection_derivative_matches_finite_differences() {
        let c = make_constraint(0.7);
        let r = [0.2, 0.2, 3.0];
        let h = 1e-7;
        for y0 in [[0.3, -0.8, 0.5], [1.0, 2.0, 0.1], [0.05, 0.02, 1.0]] {
            let (_, dpdy) = project(&c, y0, r);
            for j in 0..3 {
                let mut yp = y0;
                yp[j] += h;
                let mut ym = y0;
                ym[j] -= h;
                let (gp, _) = project(&c, yp, r);
                let (gm, _) = project(&c, ym, r);
                let fd = (gp - gm) / (2.0 * h);
                for i in 0..3 {
                    assert_relative_eq!(dpdy[(i, j)], fd[i], epsilon = 1e-6, max_relative = 1e-5);
                }
            }
        }
    }

    #[test]
    fn hessian_is_symmetric() {
        // G = dP/dy R⁻¹ must be symmetric for the projection in the R-norm.
        let c = make_constraint(0.4);
        let r = [0.01, 0.01, 2.0];
        let (_, dpdy) = project(&c, [1.0, -0.5, 0.3], r);
        let r_inv = DMatrix::from_diagonal(&DVector::from_row_slice(&[100.0, 100.0, 0.5]));
        let g = &dpdy * &r_inv;
        assert_relative_eq!(g.clone(), g.transpose(), epsilon = 1e-10, max_relative = 1e-8);
    }

    #[test]
    fn frictionless_contact() {
        let c = make_constraint(0.0);
        let (gamma, _) = project(&c, [1.0, 1.0, 2.0], [1.0, 1.0, 1.0]);
        assert_relative_eq!(gamma, DVector::from_row_slice(&[0.0, 0.0, 2.0]));
    }
}
