use na::DVector;

use super::{LineSearch, Status};
use crate::{SapModel, SearchDirection};

/// Outcome of a successful line search.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct LineSearchResult {
    pub alpha: f64,
    pub iterations: u32,
}

/// Finds the step along `direction` from `v`.
///
/// `cost` and `d_cost` are the cost and its derivative along `direction` at `v`. The derivative
/// must be negative.
pub(crate) fn perform_line_search(
    line_search: &LineSearch,
    model: &SapModel,
    v: &DVector<f64>,
    direction: &SearchDirection,
    cost: f64,
    d_cost: f64,
) -> Result<LineSearchResult, Status> {
    debug_assert!(d_cost < 0.0);
    match *line_search {
        LineSearch::Exact {
            alpha_max,
            tolerance,
            max_iterations,
        } => exact(model, v, direction, d_cost, alpha_max, tolerance, max_iterations),
        LineSearch::BackTracking {
            c,
            rho,
            alpha_max,
            max_iterations,
        } => backtracking(model, v, direction, cost, d_cost, c, rho, alpha_max, max_iterations),
    }
}

/// Minimizes the convex cost along the search direction by finding the root of `dℓ/dα` in
/// `[0, alpha_max]`.
///
/// Newton steps are taken on `dℓ/dα` and replaced by bisection whenever they leave the current
/// bracket.
fn exact(
    model: &SapModel,
    v: &DVector<f64>,
    direction: &SearchDirection,
    d_cost0: f64,
    alpha_max: f64,
    tolerance: f64,
    max_iterations: u32,
) -> Result<LineSearchResult, Status> {
    let at_max = model.calc_line_search_derivatives(v, direction, alpha_max);
    if at_max.d_cost <= 0.0 {
        // The cost keeps decreasing up to the largest allowed step.
        return Ok(LineSearchResult {
            alpha: alpha_max,
            iterations: 1,
        });
    }

    // dℓ/dα(lower) < 0 < dℓ/dα(upper)
    let mut lower = 0.0;
    let mut upper = alpha_max;

    // Start from the minimizer of the quadratic model at the end of the bracket where the
    // derivative is smallest in magnitude.
    let mut alpha = if at_max.d2_cost > 0.0 {
        alpha_max - at_max.d_cost / at_max.d2_cost
    } else {
        0.5 * alpha_max
    };
    if !(alpha > lower && alpha < upper) {
        alpha = 0.5 * (lower + upper);
    }

    for iteration in 1..=max_iterations {
        let d = model.calc_line_search_derivatives(v, direction, alpha);
        if d.d_cost.abs() <= tolerance * d_cost0.abs() {
            return Ok(LineSearchResult {
                alpha,
                iterations: iteration + 1,
            });
        }
        if d.d_cost < 0.0 {
            lower = alpha;
        } else {
            upper = alpha;
        }

        let newton = alpha - d.d_cost / d.d2_cost;
        let next = if d.d2_cost > 0.0 && newton > lower && newton < upper {
            newton
        } else {
            0.5 * (lower + upper)
        };

        if (next - alpha).abs() <= tolerance * next {
            return Ok(LineSearchResult {
                alpha: next,
                iterations: iteration + 1,
            });
        }
        alpha = next;
    }

    log::warn!(
        "Exact line search did not converge in {} iterations",
        max_iterations
    );
    Err(Status::LineSearchFailed)
}

/// Backtracks from `alpha_max` until the Armijo condition holds.
#[allow(clippy::too_many_arguments)]
fn backtracking(
    model: &SapModel,
    v: &DVector<f64>,
    direction: &SearchDirection,
    cost0: f64,
    d_cost0: f64,
    c: f64,
    rho: f64,
    alpha_max: f64,
    max_iterations: u32,
) -> Result<LineSearchResult, Status> {
    let mut alpha = alpha_max;
    for iteration in 1..=max_iterations {
        let v_alpha = v + &direction.dv * alpha;
        let cost = model.calc_cost(&v_alpha);
        if cost <= cost0 + c * alpha * d_cost0 {
            return Ok(LineSearchResult {
                alpha,
                iterations: iteration,
            });
        }
        alpha *= rho;
    }

    log::warn!(
        "Backtracking line search did not find a sufficient decrease in {} iterations",
        max_iterations
    );
    Err(Status::LineSearchFailed)
}
