//! Newton solver for the SAP formulation.

mod line_search;
pub(crate) mod linsolve;
mod newton;
mod timing;

use serde::{Deserialize, Serialize};

pub use linsolve::LinearSolveError;
pub use newton::SapSolver;
pub use timing::Timings;

use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum LineSearch {
    /// Finds the minimum of the cost along the search direction within `[0, alpha_max]` with
    /// Newton's method safeguarded by bisection.
    ///
    /// The search stops when the step changes by less than `tolerance` relative to the step
    /// itself.
    Exact {
        alpha_max: f64,
        tolerance: f64,
        max_iterations: u32,
    },
    /// Backtracking line search method decreases the step `α` by `rho` starting from
    /// `alpha_max` to satisfy the sufficient decrease condition:
    /// ℓ(vₖ + α dvₖ) ≤ ℓ(vₖ) + cα∇ℓₖᵀdvₖ
    BackTracking {
        c: f64,
        rho: f64,
        alpha_max: f64,
        max_iterations: u32,
    },
}

impl Default for LineSearch {
    fn default() -> LineSearch {
        LineSearch::default_exact()
    }
}

impl LineSearch {
    pub const fn default_exact() -> Self {
        LineSearch::Exact {
            alpha_max: 1.0,
            tolerance: 1e-8,
            max_iterations: 100,
        }
    }

    pub const fn default_backtracking() -> Self {
        LineSearch::BackTracking {
            c: 1e-4,
            rho: 0.8,
            alpha_max: 1.5,
            max_iterations: 40,
        }
    }

    /// Largest step considered by the line search.
    pub fn alpha_max(&self) -> f64 {
        match self {
            LineSearch::Exact { alpha_max, .. } | LineSearch::BackTracking { alpha_max, .. } => {
                *alpha_max
            }
        }
    }

    pub fn max_iterations(&self) -> u32 {
        match self {
            LineSearch::Exact { max_iterations, .. }
            | LineSearch::BackTracking { max_iterations, .. } => *max_iterations,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let invalid = |name: &str| {
            Err(Error::InvalidParameter {
                name: name.to_string(),
            })
        };
        if !(self.alpha_max() > 0.0) || !self.alpha_max().is_finite() {
            return invalid("line_search.alpha_max");
        }
        if self.max_iterations() == 0 {
            return invalid("line_search.max_iterations");
        }
        match *self {
            LineSearch::Exact { tolerance, .. } => {
                if !(tolerance > 0.0) {
                    return invalid("line_search.tolerance");
                }
            }
            LineSearch::BackTracking { c, rho, .. } => {
                if !(c > 0.0 && c < 1.0) {
                    return invalid("line_search.c");
                }
                if !(rho > 0.0 && rho < 1.0) {
                    return invalid("line_search.rho");
                }
            }
        }
        Ok(())
    }
}

/// Factorization used to compute the Newton direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverType {
    /// `Dense` for small problems and `Supernodal` otherwise.
    Auto,
    Dense,
    /// Block Cholesky with participating cliques as supernodes.
    Supernodal,
    /// Sparse LDLᵀ with a fill reducing ordering over scalar entries.
    SparseLdl,
}

impl Default for LinearSolverType {
    fn default() -> Self {
        LinearSolverType::Auto
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SapSolverParameters {
    /// Absolute tolerance on the scaled gradient norm.
    pub abs_tolerance: f64,
    /// Tolerance on the scaled gradient norm relative to the scaled momentum and impulse norms.
    pub rel_tolerance: f64,
    pub cost_abs_tolerance: f64,
    pub cost_rel_tolerance: f64,
    pub max_iterations: u32,
    pub line_search: LineSearch,
    pub linear_solver: LinearSolverType,
    /// Largest number of participating velocities for which `Auto` picks the dense solver.
    pub dense_size_threshold: usize,
}

impl Default for SapSolverParameters {
    fn default() -> Self {
        SapSolverParameters {
            abs_tolerance: 1e-14,
            rel_tolerance: 1e-6,
            cost_abs_tolerance: 1e-30,
            cost_rel_tolerance: 1e-15,
            max_iterations: 100,
            line_search: LineSearch::default(),
            linear_solver: LinearSolverType::default(),
            dense_size_threshold: 64,
        }
    }
}

impl SapSolverParameters {
    pub fn validate(&self) -> Result<(), Error> {
        let tolerances = [
            ("abs_tolerance", self.abs_tolerance),
            ("rel_tolerance", self.rel_tolerance),
            ("cost_abs_tolerance", self.cost_abs_tolerance),
            ("cost_rel_tolerance", self.cost_rel_tolerance),
        ];
        for (name, tol) in tolerances {
            if !(tol >= 0.0) || !tol.is_finite() {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                });
            }
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations".to_string(),
            });
        }
        self.line_search.validate()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    Success,
    MaximumIterationsExceeded,
    LinearSolveError(LinearSolveError),
    /// The line search did not find an acceptable step.
    LineSearchFailed,
    /// The Newton direction is not a descent direction, which indicates a loss of precision.
    NonDescentDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveResult {
    /// Number of Newton iterations performed.
    pub iterations: u32,
    /// Solve status.
    pub status: Status,
    /// Cost at the last evaluated iterate.
    pub cost: f64,
    /// Scaled gradient norm `‖D ∇ℓ‖` at the last evaluated iterate.
    pub gradient_norm: f64,
}

impl std::fmt::Display for SolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Convergence history of a single solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolverStats {
    pub num_iterations: u32,
    pub num_line_search_iterations: u32,
    /// Cost at the beginning of each iteration.
    pub cost: Vec<f64>,
    /// Scaled gradient norm `‖D ∇ℓ‖` at the beginning of each iteration.
    pub gradient_norm: Vec<f64>,
    /// `max(‖D A v‖, ‖D Jᵀγ‖)` at the beginning of each iteration.
    pub momentum_scale: Vec<f64>,
    /// Step accepted by the line search at each iteration.
    pub alpha: Vec<f64>,
    pub timings: Timings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() -> Result<(), Error> {
        SapSolverParameters::default().validate()?;
        SapSolverParameters {
            line_search: LineSearch::default_backtracking(),
            ..Default::default()
        }
        .validate()
    }

    #[test]
    fn invalid_parameters() {
        let params = SapSolverParameters {
            rel_tolerance: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { name }) if name == "rel_tolerance"
        ));
        let params = SapSolverParameters {
            line_search: LineSearch::BackTracking {
                c: 1e-4,
                rho: 1.0,
                alpha_max: 1.0,
                max_iterations: 10,
            },
            ..Default::default()
        };
        assert!(params.validate().is_err());
        let params = SapSolverParameters {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
