use std::time::Instant;

use na::DVector;

use super::line_search::perform_line_search;
use super::linsolve::make_linear_solver;
use super::{SapSolverParameters, SolveResult, SolverStats, Status};
use crate::{inf_norm, Error, SapContactProblem, SapModel, SapSolverResults, ScatterPolicy};

/// Newton solver for the SAP formulation of a contact problem.
#[derive(Clone, Debug, Default)]
pub struct SapSolver {
    params: SapSolverParameters,
}

impl SapSolver {
    pub fn new(params: SapSolverParameters) -> Result<Self, Error> {
        params.validate()?;
        Ok(SapSolver { params })
    }

    #[inline]
    pub fn parameters(&self) -> &SapSolverParameters {
        &self.params
    }

    /// Solves the problem starting from the free motion velocities.
    pub fn solve(&self, problem: &SapContactProblem) -> Result<SapSolverResults, Error> {
        self.solve_with_guess(problem, problem.v_star())
    }

    /// Solves the problem starting from the generalized velocities `v_guess`.
    ///
    /// Only the entries of `v_guess` for cliques with constraints are used. The remaining
    /// cliques are decoupled and always end up at their free motion velocities.
    pub fn solve_with_guess(
        &self,
        problem: &SapContactProblem,
        v_guess: &DVector<f64>,
    ) -> Result<SapSolverResults, Error> {
        if v_guess.len() != problem.num_velocities() {
            return Err(Error::SizeMismatch {
                expected: problem.num_velocities(),
                actual: v_guess.len(),
            });
        }

        if problem.num_constraints() == 0 {
            return Ok(SapSolverResults::unconstrained(problem));
        }

        let t_begin = Instant::now();
        let mut stats = SolverStats::default();
        let model = SapModel::new(problem)?;
        stats.timings.model = Instant::now() - t_begin;

        let (v, result) = self.solve_model(&model, model.to_participating(v_guess), &mut stats);
        stats.timings.total = Instant::now() - t_begin;

        log::debug!("{}", stats.timings);
        if result.status != Status::Success {
            log::warn!("SAP solve failed: {}", result);
            return Err(Error::SolveError {
                result,
                stats: Box::new(stats),
            });
        }

        Ok(self.pack_results(&model, &v, stats))
    }

    /// Runs Newton iterations on the model starting at `v`.
    fn solve_model(
        &self,
        model: &SapModel,
        mut v: DVector<f64>,
        stats: &mut SolverStats,
    ) -> (DVector<f64>, SolveResult) {
        let params = &self.params;
        let mut linear_solver = make_linear_solver(
            params.linear_solver,
            params.dense_size_threshold,
            model.num_velocities(),
        );

        log_debug_stats_header();

        let mut iterations = 0;
        let mut cost_prev = f64::INFINITY;
        let status = loop {
            let t_begin_eval = Instant::now();
            let cost = model.calc_cost(&v);
            let terms = model.calc_optimality_terms(&v);
            stats.timings.evaluation += Instant::now() - t_begin_eval;

            let momentum_scale = terms.momentum_norm.max(terms.impulse_norm);
            stats.cost.push(cost);
            stats.gradient_norm.push(terms.gradient_norm);
            stats.momentum_scale.push(momentum_scale);

            let optimality_converged = terms.gradient_norm
                <= params.abs_tolerance + params.rel_tolerance * momentum_scale;
            let cost_converged = iterations > 0
                && (cost_prev - cost).abs()
                    < params.cost_abs_tolerance
                        + params.cost_rel_tolerance * cost.max(cost_prev);
            if optimality_converged || cost_converged {
                break Status::Success;
            }

            if iterations >= params.max_iterations {
                break Status::MaximumIterationsExceeded;
            }

            let t_begin_hessian = Instant::now();
            let hessian = model.calc_hessian(&v);
            let rhs = -model.calc_gradient(&v);
            stats.timings.hessian += Instant::now() - t_begin_hessian;

            let t_begin_linsolve = Instant::now();
            let dv = match linear_solver.solve(&hessian, &rhs) {
                Ok(dv) => dv,
                Err(err) => break Status::LinearSolveError(err),
            };
            stats.timings.linear_solve += Instant::now() - t_begin_linsolve;

            let direction = model.search_direction(dv);
            let d_cost = -rhs.dot(&direction.dv);
            if !(d_cost < 0.0) {
                break Status::NonDescentDirection;
            }

            let t_begin_ls = Instant::now();
            let ls = match perform_line_search(
                &params.line_search,
                model,
                &v,
                &direction,
                cost,
                d_cost,
            ) {
                Ok(ls) => ls,
                Err(status) => break status,
            };
            stats.timings.line_search += Instant::now() - t_begin_ls;

            v.axpy(ls.alpha, &direction.dv, 1.0);
            cost_prev = cost;
            iterations += 1;

            stats.alpha.push(ls.alpha);
            stats.num_line_search_iterations += ls.iterations;
            log_debug_stats(
                iterations,
                ls.iterations,
                cost,
                terms.gradient_norm,
                inf_norm(direction.dv.iter().copied()),
                ls.alpha,
            );
        };

        stats.num_iterations = iterations;
        // The loop evaluates the cost and gradient before every exit.
        let result = SolveResult {
            iterations,
            status,
            cost: stats.cost.last().copied().unwrap_or(f64::NAN),
            gradient_norm: stats.gradient_norm.last().copied().unwrap_or(f64::NAN),
        };
        (v, result)
    }

    /// Converts the solution in participating order into full problem quantities.
    fn pack_results(
        &self,
        model: &SapModel,
        v: &DVector<f64>,
        stats: SolverStats,
    ) -> SapSolverResults {
        let problem = model.problem();
        let bundle = model.bundle();
        let eval = model.evaluation(v);

        let mut v_full = problem.v_star().clone();
        model.velocities_permutation().apply_inverse(
            v.as_slice(),
            v_full.as_mut_slice(),
            ScatterPolicy::Untouched,
        );
        let mut tau = DVector::zeros(problem.num_velocities());
        model.velocities_permutation().apply_inverse(
            eval.jt_gamma.as_slice(),
            tau.as_mut_slice(),
            ScatterPolicy::Zeroed,
        );

        SapSolverResults::new(
            problem,
            v_full,
            bundle.to_problem_order(&eval.gamma),
            bundle.to_problem_order(&eval.vc),
            tau,
            stats,
        )
    }
}

/*
 * Status print routines.
 * i       - iteration number
 * cost    - cost at the beginning of the iteration
 * grad    - scaled gradient norm at the beginning of the iteration
 * |dv|    - infinity norm of the Newton step
 * alpha   - accepted step
 * ls #    - number of line search iterations
 */

fn log_debug_stats_header() {
    log::debug!("    i |    cost    |    grad    |    |dv|    |   alpha    | ls # ");
    log::debug!("------+------------+------------+------------+------------+------");
}

fn log_debug_stats(
    iterations: u32,
    ls_steps: u32,
    cost: f64,
    gradient_norm: f64,
    dv_norm: f64,
    alpha: f64,
) {
    log::debug!(
        "{i:>5} | {cost:10.3e} | {grad:10.3e} | {dv:10.3e} | {alpha:10.3e} | {ls:>4} ",
        i = iterations,
        cost = cost,
        grad = gradient_norm,
        dv = dv_norm,
        alpha = alpha,
        ls = ls_steps
    );
}
