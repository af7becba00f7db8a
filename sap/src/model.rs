//! The SAP model: the unconstrained convex cost of a contact problem.
//!
//! The model only works with cliques that participate in at least one constraint. Velocities of
//! the remaining cliques are decoupled and equal to their free motion velocities at the solution.
//! All velocity vectors taken and returned by the model are in *participating* order, that is
//! with velocities grouped by participating clique in increasing clique index.
//!
//! The cost is
//!
//! ```text
//! ℓ(v) = ½ (v − v*)ᵀ A (v − v*) + Σᵢ ℓᵢ(Jᵢ v)
//! ```
//!
//! with gradient `A (v − v*) − Jᵀγ` and Hessian `A + Jᵀ G J`.

use std::cell::{Ref, RefCell};

use na::{DMatrix, DVector};

use crate::{
    Error, PartialPermutation, SapConstraintBundle, SapContactProblem, SymmetricBlockSparseMatrix,
};

/// Quantities derived from a single trial velocity.
#[derive(Clone, Debug)]
pub struct SapEvaluation {
    /// Trial velocity in participating order.
    pub v: DVector<f64>,
    /// Constraint velocities in bundle order.
    pub vc: DVector<f64>,
    /// Unprojected impulses.
    pub y: DVector<f64>,
    /// Projected impulses.
    pub gamma: DVector<f64>,
    /// `A v`.
    pub a_v: DVector<f64>,
    /// `A (v − v*)`.
    pub a_dv: DVector<f64>,
    /// Generalized impulses `Jᵀγ`.
    pub jt_gamma: DVector<f64>,
    pub momentum_cost: f64,
    pub constraints_cost: f64,
    pub cost: f64,
    pub gradient: DVector<f64>,
    /// Per constraint Hessians `G` in bundle order, computed on demand.
    g: Option<Vec<DMatrix<f64>>>,
}

impl SapEvaluation {
    fn empty() -> Self {
        SapEvaluation {
            v: DVector::zeros(0),
            vc: DVector::zeros(0),
            y: DVector::zeros(0),
            gamma: DVector::zeros(0),
            a_v: DVector::zeros(0),
            a_dv: DVector::zeros(0),
            jt_gamma: DVector::zeros(0),
            momentum_cost: 0.0,
            constraints_cost: 0.0,
            cost: 0.0,
            gradient: DVector::zeros(0),
            g: None,
        }
    }

    fn is_at(&self, v: &DVector<f64>) -> bool {
        self.v.len() == v.len()
            && self
                .v
                .iter()
                .zip(v.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Derivatives of the cost restricted to the line `v + α dv`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LineSearchDerivatives {
    pub cost: f64,
    /// `dℓ/dα`
    pub d_cost: f64,
    /// `d²ℓ/dα²`
    pub d2_cost: f64,
}

/// A search direction with the quantities that remain constant along it.
#[derive(Clone, Debug)]
pub struct SearchDirection {
    pub dv: DVector<f64>,
    /// `J dv`
    pub dvc: DVector<f64>,
    /// `dvᵀ A dv`
    pub dv_a_dv: f64,
}

/// Terms entering the optimality criterion, all scaled by `D = diag(A)^{-1/2}`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OptimalityTerms {
    /// `‖D ∇ℓ‖`
    pub gradient_norm: f64,
    /// `‖D A v‖`
    pub momentum_norm: f64,
    /// `‖D Jᵀγ‖`
    pub impulse_norm: f64,
}

#[derive(Debug)]
pub struct SapModel<'a> {
    problem: &'a SapContactProblem,
    cliques_permutation: PartialPermutation,
    velocities_permutation: PartialPermutation,
    /// Dynamics matrix blocks of participating cliques.
    a: Vec<DMatrix<f64>>,
    /// Offset of each participating clique in participating velocities plus one trailing entry.
    clique_starts: Vec<usize>,
    v_star: DVector<f64>,
    a_v_star: DVector<f64>,
    /// `diag(A)^{-1/2}`
    diagonal_scaling: DVector<f64>,
    bundle: SapConstraintBundle<'a>,
    /// Evaluation at the last trial velocity.
    cache: RefCell<SapEvaluation>,
}

impl<'a> SapModel<'a> {
    pub fn new(problem: &'a SapContactProblem) -> Result<Self, Error> {
        let graph = problem.graph();
        let cliques_permutation = graph.participating_cliques();
        let clique_sizes: Vec<usize> = (0..problem.num_cliques())
            .map(|c| problem.num_velocities_of(c))
            .collect();
        let velocities_permutation = cliques_permutation.expand(&clique_sizes)?;

        let a: Vec<DMatrix<f64>> = cliques_permutation
            .permuted_to_full()
            .iter()
            .map(|&c| problem.dynamics_matrix()[c].clone())
            .collect();
        let mut clique_starts = Vec::with_capacity(a.len() + 1);
        let mut n = 0;
        clique_starts.push(0);
        for ac in a.iter() {
            n += ac.nrows();
            clique_starts.push(n);
        }

        let v_star = DVector::from_vec(velocities_permutation.apply(problem.v_star().as_slice()));
        let diagonal_scaling = DVector::from_iterator(
            n,
            a.iter()
                .flat_map(|ac| (0..ac.nrows()).map(move |i| 1.0 / ac[(i, i)].sqrt())),
        );

        let delassus_diagonal =
            calc_delassus_diagonal_approximation(problem, &cliques_permutation)?;
        let bundle = SapConstraintBundle::new(problem, &delassus_diagonal)?;

        let mut model = SapModel {
            problem,
            cliques_permutation,
            velocities_permutation,
            a,
            clique_starts,
            a_v_star: DVector::zeros(n),
            v_star,
            diagonal_scaling,
            bundle,
            cache: RefCell::new(SapEvaluation::empty()),
        };
        model.a_v_star = model.multiply_by_dynamics_matrix(&model.v_star);
        let eval = model.evaluate(&model.v_star);
        *model.cache.get_mut() = eval;
        Ok(model)
    }

    #[inline]
    pub fn problem(&self) -> &'a SapContactProblem {
        self.problem
    }

    #[inline]
    pub fn bundle(&self) -> &SapConstraintBundle<'a> {
        &self.bundle
    }

    /// Number of participating velocities.
    #[inline]
    pub fn num_velocities(&self) -> usize {
        self.v_star.len()
    }

    /// Number of participating cliques.
    #[inline]
    pub fn num_cliques(&self) -> usize {
        self.a.len()
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.bundle.num_constraints()
    }

    #[inline]
    pub fn num_constraint_equations(&self) -> usize {
        self.bundle.num_constraint_equations()
    }

    /// Maps problem cliques to participating cliques.
    #[inline]
    pub fn cliques_permutation(&self) -> &PartialPermutation {
        &self.cliques_permutation
    }

    /// Maps problem velocities to participating velocities.
    #[inline]
    pub fn velocities_permutation(&self) -> &PartialPermutation {
        &self.velocities_permutation
    }

    /// Dynamics matrix blocks of participating cliques.
    #[inline]
    pub fn dynamics_matrix(&self) -> &[DMatrix<f64>] {
        &self.a
    }

    #[inline]
    pub fn clique_start(&self, clique: usize) -> usize {
        self.clique_starts[clique]
    }

    pub fn clique_sizes(&self) -> Vec<usize> {
        self.a.iter().map(|ac| ac.nrows()).collect()
    }

    /// Free motion velocities of participating cliques.
    #[inline]
    pub fn v_star(&self) -> &DVector<f64> {
        &self.v_star
    }

    #[inline]
    pub fn diagonal_scaling(&self) -> &DVector<f64> {
        &self.diagonal_scaling
    }

    /// Gathers the participating velocities of a full velocity vector.
    pub fn to_participating(&self, v_full: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(self.velocities_permutation.apply(v_full.as_slice()))
    }

    pub fn multiply_by_dynamics_matrix(&self, v: &DVector<f64>) -> DVector<f64> {
        assert_eq!(v.len(), self.num_velocities());
        let mut out = DVector::zeros(v.len());
        for (c, ac) in self.a.iter().enumerate() {
            let (start, n) = (self.clique_starts[c], ac.nrows());
            out.rows_mut(start, n).gemv(1.0, ac, &v.rows(start, n), 0.0);
        }
        out
    }

    /// Evaluates the model at `v`, reusing the previous evaluation if `v` did not change.
    pub fn evaluation(&self, v: &DVector<f64>) -> Ref<'_, SapEvaluation> {
        self.update_cache(v);
        self.cache.borrow()
    }

    fn update_cache(&self, v: &DVector<f64>) {
        if self.cache.borrow().is_at(v) {
            return;
        }
        let eval = self.evaluate(v);
        *self.cache.borrow_mut() = eval;
    }

    fn evaluate(&self, v: &DVector<f64>) -> SapEvaluation {
        assert_eq!(v.len(), self.num_velocities());
        let a_v = self.multiply_by_dynamics_matrix(v);
        let a_dv = &a_v - &self.a_v_star;
        let momentum_cost = 0.5 * (v - &self.v_star).dot(&a_dv);

        let vc = self.bundle.j().mul_vec(v);
        let y = self.bundle.calc_unprojected_impulses(&vc);
        let gamma = self.bundle.project_impulses(&y);
        let constraints_cost = self.bundle.calc_cost(&y, &gamma);
        let jt_gamma = self.bundle.j().transpose_mul_vec(&gamma);
        let gradient = &a_dv - &jt_gamma;

        SapEvaluation {
            v: v.clone(),
            vc,
            y,
            gamma,
            a_v,
            a_dv,
            jt_gamma,
            momentum_cost,
            constraints_cost,
            cost: momentum_cost + constraints_cost,
            gradient,
            g: None,
        }
    }

    /// Per constraint Hessians `G = dP/dy R⁻¹` in bundle order at `v`.
    pub fn constraints_hessian(&self, v: &DVector<f64>) -> Ref<'_, [DMatrix<f64>]> {
        self.update_cache(v);
        {
            let mut eval = self.cache.borrow_mut();
            if eval.g.is_none() {
                let (_, g) = self.bundle.project_impulses_and_calc_hessian(&eval.y);
                eval.g = Some(g);
            }
        }
        Ref::map(self.cache.borrow(), |eval| eval.g.as_deref().unwrap_or(&[]))
    }

    #[inline]
    pub fn calc_cost(&self, v: &DVector<f64>) -> f64 {
        self.evaluation(v).cost
    }

    #[inline]
    pub fn calc_gradient(&self, v: &DVector<f64>) -> DVector<f64> {
        self.evaluation(v).gradient.clone()
    }

    /// Impulses in bundle order.
    #[inline]
    pub fn calc_impulses(&self, v: &DVector<f64>) -> DVector<f64> {
        self.evaluation(v).gamma.clone()
    }

    /// Constraint velocities in bundle order.
    #[inline]
    pub fn calc_constraint_velocities(&self, v: &DVector<f64>) -> DVector<f64> {
        self.evaluation(v).vc.clone()
    }

    pub fn calc_optimality_terms(&self, v: &DVector<f64>) -> OptimalityTerms {
        let eval = self.evaluation(v);
        let scaled_norm = |x: &DVector<f64>| x.component_mul(&self.diagonal_scaling).norm();
        OptimalityTerms {
            gradient_norm: scaled_norm(&eval.gradient),
            momentum_norm: scaled_norm(&eval.a_v),
            impulse_norm: scaled_norm(&eval.jt_gamma),
        }
    }

    /// Assembles the Hessian `A + Jᵀ G J` with one block per participating clique.
    pub fn calc_hessian(&self, v: &DVector<f64>) -> SymmetricBlockSparseMatrix {
        let g = self.constraints_hessian(v);
        let mut hessian = SymmetricBlockSparseMatrix::new(&self.clique_sizes());
        for (c, ac) in self.a.iter().enumerate() {
            hessian.add_to_block(c, c, ac);
        }

        let j = self.bundle.j();
        let mut k = 0;
        for (r, cluster) in self.problem.graph().clusters().iter().enumerate() {
            let m = j.block_row_size(r);
            let mut g_cluster = DMatrix::zeros(m, m);
            let mut row = 0;
            for gk in g[k..k + cluster.num_constraints()].iter() {
                g_cluster.view_mut((row, row), gk.shape()).copy_from(gk);
                row += gk.nrows();
            }
            k += cluster.num_constraints();

            // Only blocks on or below the diagonal are accumulated.
            for bj in j.block_row(r) {
                let g_jj = &g_cluster * &bj.value;
                for bi in j.block_row(r).filter(|bi| bi.block_col >= bj.block_col) {
                    hessian.add_to_block(bi.block_col, bj.block_col, &bi.value.tr_mul(&g_jj));
                }
            }
        }
        hessian
    }

    /// Computes the quantities needed to evaluate the cost along `dv`.
    pub fn search_direction(&self, dv: DVector<f64>) -> SearchDirection {
        let dvc = self.bundle.j().mul_vec(&dv);
        let dv_a_dv = dv.dot(&self.multiply_by_dynamics_matrix(&dv));
        SearchDirection { dv, dvc, dv_a_dv }
    }

    /// Cost and its first two derivatives along `direction` at `v + α dv`.
    pub fn calc_line_search_derivatives(
        &self,
        v: &DVector<f64>,
        direction: &SearchDirection,
        alpha: f64,
    ) -> LineSearchDerivatives {
        let v_alpha = v + &direction.dv * alpha;
        let (cost, d_cost) = {
            let eval = self.evaluation(&v_alpha);
            (eval.cost, eval.gradient.dot(&direction.dv))
        };

        let g = self.constraints_hessian(&v_alpha);
        let bundle = &self.bundle;
        let constraints_curvature: f64 = g
            .iter()
            .enumerate()
            .map(|(k, gk)| {
                let dvc = direction
                    .dvc
                    .rows(bundle.equation_offset(k), bundle.num_equations_of(k));
                dvc.dot(&(gk * dvc))
            })
            .sum();

        LineSearchDerivatives {
            cost,
            d_cost,
            d2_cost: direction.dv_a_dv + constraints_curvature,
        }
    }
}

/// Computes `wᵢ = ‖Σ_c Jᵢc Ac⁻¹ Jᵢcᵀ‖_F / kᵢ` for each constraint `i` in problem order, where `kᵢ`
/// is the number of equations of constraint `i`.
fn calc_delassus_diagonal_approximation(
    problem: &SapContactProblem,
    cliques_permutation: &PartialPermutation,
) -> Result<Vec<f64>, Error> {
    let cholesky: Vec<_> = cliques_permutation
        .permuted_to_full()
        .iter()
        .map(|&c| {
            problem.dynamics_matrix()[c]
                .clone()
                .cholesky()
                .ok_or(Error::NotPositiveDefinite { clique: c })
        })
        .collect::<Result<_, _>>()?;

    problem
        .constraints()
        .map(|constraint| {
            let k = constraint.num_constraint_equations();
            let mut w = DMatrix::zeros(k, k);
            for block in constraint.jacobian().blocks() {
                let chol = &cholesky[cliques_permutation.permuted_index(block.clique)?];
                let a_inv_jt = chol.solve(&block.matrix.transpose());
                w += &block.matrix * a_inv_jt;
            }
            Ok(w.norm() / k as f64)
        })
        .collect()
}
