//! This module provides the interface shared by all SAP constraints.
//!
//! A constraint with `k` equations maps generalized velocities to constraint velocities
//! `vc = J v` through a Jacobian with one or two dense blocks, one per clique. Given the
//! constraint velocity, its impulse is found by projecting the unprojected impulse
//! `y = -R⁻¹ (vc - v̂)` onto the convex set of admissible impulses in the norm defined by the
//! diagonal regularization `R`.

use na::{DMatrix, DVector, DVectorView};

use crate::Error;

/// The Jacobian block of a constraint with respect to the velocities of a single clique.
#[derive(Clone, Debug, PartialEq)]
pub struct CliqueJacobian {
    pub clique: usize,
    pub matrix: DMatrix<f64>,
}

impl CliqueJacobian {
    pub fn new(clique: usize, matrix: DMatrix<f64>) -> Self {
        CliqueJacobian { clique, matrix }
    }
}

/// Constraint Jacobian with one block per clique the constraint acts on.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintJacobian {
    first: CliqueJacobian,
    second: Option<CliqueJacobian>,
}

impl ConstraintJacobian {
    /// Jacobian of a constraint acting on a single clique.
    pub fn single(clique: usize, matrix: DMatrix<f64>) -> Self {
        ConstraintJacobian {
            first: CliqueJacobian::new(clique, matrix),
            second: None,
        }
    }

    /// Jacobian of a constraint coupling two distinct cliques.
    pub fn pair(
        first_clique: usize,
        first: DMatrix<f64>,
        second_clique: usize,
        second: DMatrix<f64>,
    ) -> Result<Self, Error> {
        if first_clique == second_clique {
            return Err(Error::invalid_argument(format!(
                "both Jacobian blocks refer to clique {}",
                first_clique
            )));
        }
        if first.nrows() != second.nrows() {
            return Err(Error::SizeMismatch {
                expected: first.nrows(),
                actual: second.nrows(),
            });
        }
        Ok(ConstraintJacobian {
            first: CliqueJacobian::new(first_clique, first),
            second: Some(CliqueJacobian::new(second_clique, second)),
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.first.matrix.nrows()
    }

    #[inline]
    pub fn num_cliques(&self) -> usize {
        if self.second.is_some() {
            2
        } else {
            1
        }
    }

    #[inline]
    pub fn first(&self) -> &CliqueJacobian {
        &self.first
    }

    #[inline]
    pub fn second(&self) -> Option<&CliqueJacobian> {
        self.second.as_ref()
    }

    /// Iterates over the (one or two) clique blocks.
    pub fn blocks(&self) -> impl Iterator<Item = &CliqueJacobian> + '_ {
        std::iter::once(&self.first).chain(self.second.iter())
    }

    /// The block for the given clique, if the constraint acts on it.
    pub fn block_for(&self, clique: usize) -> Option<&DMatrix<f64>> {
        self.blocks()
            .find(|b| b.clique == clique)
            .map(|b| &b.matrix)
    }
}

/// Near-rigid regularization shared by all compliant constraints.
///
/// With stiffness `k` and dissipation time scale `τd` the compliant regularization is
/// `1 / (δt k (δt + τd))`. The near-rigid regime is bounded below by `β²/(4π²) w`, where `w` is
/// the Delassus diagonal approximation, which keeps the constraint from becoming stiffer than
/// the time step can resolve.
pub(crate) fn near_rigid_regularization(
    time_step: f64,
    wi: f64,
    stiffness: f64,
    dissipation_time_scale: f64,
    beta: f64,
) -> f64 {
    let beta_factor = beta * beta / (4.0 * std::f64::consts::PI * std::f64::consts::PI);
    let compliant = 1.0 / (time_step * stiffness * (time_step + dissipation_time_scale));
    (beta_factor * wi).max(compliant)
}

pub(crate) fn check_compliance_parameters(
    stiffness: f64,
    dissipation_time_scale: f64,
    beta: f64,
) -> Result<(), Error> {
    // Infinite stiffness models the rigid limit.
    if !(stiffness > 0.0) {
        return Err(Error::invalid_argument(format!(
            "stiffness must be strictly positive, got {}",
            stiffness
        )));
    }
    if !(dissipation_time_scale >= 0.0) || !dissipation_time_scale.is_finite() {
        return Err(Error::invalid_argument(format!(
            "dissipation time scale must be non-negative, got {}",
            dissipation_time_scale
        )));
    }
    if !(beta > 0.0) || !beta.is_finite() {
        return Err(Error::invalid_argument(format!(
            "near rigid parameter must be strictly positive, got {}",
            beta
        )));
    }
    Ok(())
}

/// A compliant constraint of the SAP formulation.
pub trait SapConstraint: std::fmt::Debug + Send + Sync {
    /// The Jacobian blocks of this constraint, fixed at construction.
    fn jacobian(&self) -> &ConstraintJacobian;

    /// Constraint velocity `v̂` for which the impulse vanishes.
    ///
    /// `wi` is the Delassus diagonal approximation of this constraint.
    fn calc_bias_term(&self, time_step: f64, wi: f64) -> DVector<f64>;

    /// Diagonal of the regularization matrix `R`. All entries must be strictly positive.
    fn calc_diagonal_regularization(&self, time_step: f64, wi: f64) -> DVector<f64>;

    /// Projects the unprojected impulse `y` onto the admissible set of impulses in the norm
    /// defined by the diagonal regularization `r`.
    ///
    /// If `dpdy` is given, it is filled with the derivative of the projection with respect to
    /// `y`.
    fn project(
        &self,
        y: DVectorView<f64>,
        r: DVectorView<f64>,
        gamma: &mut DVector<f64>,
        dpdy: Option<&mut DMatrix<f64>>,
    );

    #[inline]
    fn num_constraint_equations(&self) -> usize {
        self.jacobian().rows()
    }

    #[inline]
    fn num_cliques(&self) -> usize {
        self.jacobian().num_cliques()
    }

    #[inline]
    fn first_clique(&self) -> usize {
        self.jacobian().first().clique
    }

    #[inline]
    fn second_clique(&self) -> Option<usize> {
        self.jacobian().second().map(|b| b.clique)
    }

    /// Cost of this constraint given the unprojected impulse `y` and its projection `gamma`.
    ///
    /// This is the convex potential `ℓ(vc) = γᵀR y − ½ γᵀR γ` whose gradient with respect to
    /// the constraint velocity is `−γ`.
    fn calc_cost(
        &self,
        y: DVectorView<f64>,
        r: DVectorView<f64>,
        gamma: DVectorView<f64>,
    ) -> f64 {
        gamma
            .iter()
            .zip(r.iter())
            .zip(y.iter())
            .map(|((&g, &r), &y)| g * r * (y - 0.5 * g))
            .sum()
    }
}
