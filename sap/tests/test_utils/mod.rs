use approx::assert_relative_eq;
use na::DVector;
pub use sap::test_utils::*;
use sap::{Error, SapContactProblem, SapModel, SapSolverResults};

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("SAP_LOG")
        .is_test(true)
        .try_init();
}

/// Checks that the generalized impulses balance the momentum change, `A (v − v*) = Jᵀγ`, for
/// every clique.
#[allow(dead_code)]
pub fn check_momentum_balance(
    problem: &SapContactProblem,
    results: &SapSolverResults,
    tol: f64,
) {
    for (c, ac) in problem.dynamics_matrix().iter().enumerate() {
        let start = problem.velocity_start(c);
        let n = ac.nrows();
        let dv = results.v.rows(start, n) - problem.v_star().rows(start, n);
        let momentum = ac * dv;
        let tau = results.tau.rows(start, n).clone_owned();
        assert_relative_eq!(momentum, tau, max_relative = tol, epsilon = tol);
    }
}

/// Scaled gradient norm of the SAP cost at the solution relative to the momentum scale.
#[allow(dead_code)]
pub fn relative_gradient_norm(
    problem: &SapContactProblem,
    v: &DVector<f64>,
) -> Result<f64, Error> {
    let model = SapModel::new(problem)?;
    let terms = model.calc_optimality_terms(&model.to_participating(v));
    Ok(terms.gradient_norm / terms.momentum_norm.max(terms.impulse_norm))
}
