use na::{DMatrix, DVector, DVectorView};
use serde::{Deserialize, Serialize};

use crate::constraint::*;
use crate::Error;

/// Compliance of a limit constraint.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitParameters {
    pub stiffness: f64,
    pub dissipation_time_scale: f64,
    pub beta: f64,
}

impl Default for LimitParameters {
    fn default() -> Self {
        LimitParameters {
            stiffness: f64::INFINITY,
            dissipation_time_scale: 0.0,
            beta: 1.0,
        }
    }
}

/// Position limits `ql ≤ q ≤ qu` on a single degree of freedom of a clique.
///
/// There is one equation per finite limit, lower limit first. The lower limit has constraint
/// function `g = q − ql` and Jacobian row `+e`, the upper limit has `g = qu − q` and Jacobian row
/// `−e`. Impulses are non-negative.
#[derive(Clone, Debug, PartialEq)]
pub struct LimitConstraint {
    jacobian: ConstraintJacobian,
    clique_dof: usize,
    q0: f64,
    lower: f64,
    upper: f64,
    g0: DVector<f64>,
    params: LimitParameters,
}

impl LimitConstraint {
    pub fn new(
        clique: usize,
        clique_dof: usize,
        clique_num_velocities: usize,
        q0: f64,
        lower: f64,
        upper: f64,
        params: LimitParameters,
    ) -> Result<Self, Error> {
        if clique_dof >= clique_num_velocities {
            return Err(Error::OutOfRange {
                index: clique_dof,
                size: clique_num_velocities,
            });
        }
        if !q0.is_finite() {
            return Err(Error::invalid_argument("position must be finite"));
        }
        if lower.is_nan() || upper.is_nan() || !(lower <= upper) {
            return Err(Error::invalid_argument(format!(
                "lower limit {} must not exceed upper limit {}",
                lower, upper
            )));
        }
        if lower == f64::NEG_INFINITY && upper == f64::INFINITY {
            return Err(Error::invalid_argument(
                "at least one of the limits must be finite",
            ));
        }
        check_compliance_parameters(params.stiffness, params.dissipation_time_scale, params.beta)?;

        let mut rows = Vec::new();
        let mut g0 = Vec::new();
        if lower.is_finite() {
            rows.push(1.0);
            g0.push(q0 - lower);
        }
        if upper.is_finite() {
            rows.push(-1.0);
            g0.push(upper - q0);
        }

        let mut j = DMatrix::zeros(rows.len(), clique_num_velocities);
        for (i, sign) in rows.into_iter().enumerate() {
            j[(i, clique_dof)] = sign;
        }

        Ok(LimitConstraint {
            jacobian: ConstraintJacobian::single(clique, j),
            clique_dof,
            q0,
            lower,
            upper,
            g0: DVector::from_vec(g0),
            params,
        })
    }

    #[inline]
    pub fn clique_dof(&self) -> usize {
        self.clique_dof
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.q0
    }

    #[inline]
    pub fn lower_limit(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub fn upper_limit(&self) -> f64 {
        self.upper
    }

    /// Constraint function values, one per finite limit.
    #[inline]
    pub fn constraint_function(&self) -> &DVector<f64> {
        &self.g0
    }

    #[inline]
    pub fn parameters(&self) -> &LimitParameters {
        &self.params
    }
}

impl SapConstraint for LimitConstraint {
    fn jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    fn calc_bias_term(&self, time_step: f64, _wi: f64) -> DVector<f64> {
        -&self.g0 / (time_step + self.params.dissipation_time_scale)
    }

    fn calc_diagonal_regularization(&self, time_step: f64, wi: f64) -> DVector<f64> {
        let LimitParameters {
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
        for i in 0..y.len() {
            gamma[i] = y[i].max(0.0);
        }
        if let Some(dpdy) = dpdy {
            dpdy.fill(0.0);
            for i in 0..y.len() {
                if y[i] > 0.0 {
                    dpdy[(i, i)] = 1.0;
                }
            }
        }
    }
}
