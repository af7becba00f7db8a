//! Constraints of a contact problem stacked into a single set of equations.
//!
//! Constraints are grouped by cluster, so that all equations coupling the same pair of cliques
//! are contiguous. We call this ordering *bundle order*, as opposed to the order in which
//! constraints were added to the problem.

use na::{DMatrix, DVector};
use rayon::prelude::*;

use crate::{
    BlockSparseMatrix, Error, PartialPermutation, SapConstraint, SapContactProblem, ScatterPolicy,
};

/// All constraints of a problem in bundle order together with their Jacobian, regularization and
/// bias.
#[derive(Debug)]
pub struct SapConstraintBundle<'a> {
    constraints: Vec<&'a dyn SapConstraint>,
    /// Problem index of each constraint in bundle order.
    constraint_order: Vec<usize>,
    /// Offset of each constraint's equations in bundle order plus one trailing entry.
    offsets: Vec<usize>,
    /// Maps equations in problem order to equations in bundle order.
    equation_permutation: PartialPermutation,
    /// Block rows are clusters and block columns are participating cliques.
    j: BlockSparseMatrix,
    r: DVector<f64>,
    v_hat: DVector<f64>,
    delassus_diagonal: Vec<f64>,
}

impl<'a> SapConstraintBundle<'a> {
    /// Builds the bundle for the constraints of `problem`.
    ///
    /// `delassus_diagonal` holds the Delassus approximation of each constraint in problem order.
    pub fn new(problem: &'a SapContactProblem, delassus_diagonal: &[f64]) -> Result<Self, Error> {
        let num_constraints = problem.num_constraints();
        if delassus_diagonal.len() != num_constraints {
            return Err(Error::SizeMismatch {
                expected: num_constraints,
                actual: delassus_diagonal.len(),
            });
        }

        let graph = problem.graph();
        let participating = graph.participating_cliques();
        let clique_sizes: Vec<usize> = participating
            .permuted_to_full()
            .iter()
            .map(|&c| problem.num_velocities_of(c))
            .collect();
        let cluster_sizes: Vec<usize> = graph
            .clusters()
            .iter()
            .map(|cluster| cluster.num_total_constraint_equations())
            .collect();

        let mut problem_offsets = Vec::with_capacity(num_constraints);
        let mut n = 0;
        for c in problem.constraints() {
            problem_offsets.push(n);
            n += c.num_constraint_equations();
        }

        let time_step = problem.time_step();
        let mut j = BlockSparseMatrix::new(&cluster_sizes, &clique_sizes);
        let mut constraints = Vec::with_capacity(num_constraints);
        let mut constraint_order = Vec::with_capacity(num_constraints);
        let mut offsets = Vec::with_capacity(num_constraints + 1);
        let mut equations = Vec::with_capacity(n);
        let mut r = Vec::with_capacity(n);
        let mut v_hat = Vec::with_capacity(n);
        let mut bundle_delassus = Vec::with_capacity(num_constraints);
        offsets.push(0);

        for (block_row, cluster) in graph.clusters().iter().enumerate() {
            let pair = cluster.cliques();
            let cliques = if pair.is_self_edge() {
                vec![pair.first()]
            } else {
                vec![pair.first(), pair.second()]
            };

            for clique in cliques {
                let nv = problem.num_velocities_of(clique);
                let mut block = DMatrix::zeros(cluster.num_total_constraint_equations(), nv);
                let mut row = 0;
                for &i in cluster.constraint_index() {
                    let constraint = problem.constraint(i);
                    let k = constraint.num_constraint_equations();
                    let jc = constraint.jacobian().block_for(clique).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "constraint {} has no Jacobian block for clique {}",
                            i, clique
                        ))
                    })?;
                    block.view_mut((row, 0), (k, nv)).copy_from(jc);
                    row += k;
                }
                j.add_block(block_row, participating.permuted_index(clique)?, block)?;
            }

            for &i in cluster.constraint_index() {
                let constraint = problem.constraint(i);
                let k = constraint.num_constraint_equations();
                let wi = delassus_diagonal[i];
                let ri = constraint.calc_diagonal_regularization(time_step, wi);
                if ri.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
                    return Err(Error::invalid_argument(format!(
                        "regularization of constraint {} must be strictly positive and finite",
                        i
                    )));
                }
                let vi = constraint.calc_bias_term(time_step, wi);
                if vi.len() != k || ri.len() != k {
                    return Err(Error::SizeMismatch {
                        expected: k,
                        actual: if vi.len() != k { vi.len() } else { ri.len() },
                    });
                }
                r.extend(ri.iter());
                v_hat.extend(vi.iter());
                equations.extend(problem_offsets[i]..problem_offsets[i] + k);
                constraints.push(constraint);
                constraint_order.push(i);
                bundle_delassus.push(wi);
                offsets.push(equations.len());
            }
        }

        Ok(SapConstraintBundle {
            constraints,
            constraint_order,
            offsets,
            equation_permutation: PartialPermutation::new(n, &equations)?,
            j,
            r: DVector::from_vec(r),
            v_hat: DVector::from_vec(v_hat),
            delassus_diagonal: bundle_delassus,
        })
    }

    /// Constraint Jacobian with rows in bundle order and columns over participating velocities.
    #[inline]
    pub fn j(&self) -> &BlockSparseMatrix {
        &self.j
    }

    /// Diagonal of the regularization matrix.
    #[inline]
    pub fn r(&self) -> &DVector<f64> {
        &self.r
    }

    #[inline]
    pub fn v_hat(&self) -> &DVector<f64> {
        &self.v_hat
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn num_constraint_equations(&self) -> usize {
        self.r.len()
    }

    #[inline]
    pub fn constraint(&self, k: usize) -> &dyn SapConstraint {
        self.constraints[k]
    }

    /// Offset of the first equation of the `k`-th constraint in bundle order.
    #[inline]
    pub fn equation_offset(&self, k: usize) -> usize {
        self.offsets[k]
    }

    #[inline]
    pub fn num_equations_of(&self, k: usize) -> usize {
        self.offsets[k + 1] - self.offsets[k]
    }

    /// Problem index of each constraint in bundle order.
    #[inline]
    pub fn constraint_order(&self) -> &[usize] {
        &self.constraint_order
    }

    /// Delassus approximation of each constraint in bundle order.
    #[inline]
    pub fn delassus_diagonal(&self) -> &[f64] {
        &self.delassus_diagonal
    }

    #[inline]
    pub fn equation_permutation(&self) -> &PartialPermutation {
        &self.equation_permutation
    }

    /// Reorders a vector of constraint equations from bundle order to problem order.
    pub fn to_problem_order(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(x.len());
        self.equation_permutation.apply_inverse(
            x.as_slice(),
            out.as_mut_slice(),
            ScatterPolicy::Zeroed,
        );
        out
    }

    /// Reorders a vector of constraint equations from problem order to bundle order.
    pub fn to_bundle_order(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(self.equation_permutation.apply(x.as_slice()))
    }

    /// Computes `y = −R⁻¹ (vc − v̂)`.
    pub fn calc_unprojected_impulses(&self, vc: &DVector<f64>) -> DVector<f64> {
        assert_eq!(vc.len(), self.num_constraint_equations());
        DVector::from_iterator(
            vc.len(),
            vc.iter()
                .zip(self.v_hat.iter())
                .zip(self.r.iter())
                .map(|((&vc, &v_hat), &r)| -(vc - v_hat) / r),
        )
    }

    /// Projects each constraint's unprojected impulses onto its admissible set.
    pub fn project_impulses(&self, y: &DVector<f64>) -> DVector<f64> {
        assert_eq!(y.len(), self.num_constraint_equations());
        let segments: Vec<DVector<f64>> = self
            .constraints
            .par_iter()
            .enumerate()
            .map(|(k, c)| {
                let (start, n) = (self.offsets[k], self.num_equations_of(k));
                let mut gamma = DVector::zeros(n);
                c.project(y.rows(start, n), self.r.rows(start, n), &mut gamma, None);
                gamma
            })
            .collect();
        self.concatenate(&segments)
    }

    /// Projects the impulses as in [`project_impulses`](Self::project_impulses) and computes
    /// the Hessian `G = dP/dy R⁻¹` of each constraint's cost with respect to its velocity.
    pub fn project_impulses_and_calc_hessian(
        &self,
        y: &DVector<f64>,
    ) -> (DVector<f64>, Vec<DMatrix<f64>>) {
        assert_eq!(y.len(), self.num_constraint_equations());
        let (segments, g): (Vec<_>, Vec<_>) = self
            .constraints
            .par_iter()
            .enumerate()
            .map(|(k, c)| {
                let (start, n) = (self.offsets[k], self.num_equations_of(k));
                let r = self.r.rows(start, n);
                let mut gamma = DVector::zeros(n);
                let mut dpdy = DMatrix::zeros(n, n);
                c.project(y.rows(start, n), r, &mut gamma, Some(&mut dpdy));
                for (mut col, &rj) in dpdy.column_iter_mut().zip(r.iter()) {
                    col /= rj;
                }
                (gamma, dpdy)
            })
            .unzip();
        (self.concatenate(&segments), g)
    }

    /// Total cost of all constraints.
    pub fn calc_cost(&self, y: &DVector<f64>, gamma: &DVector<f64>) -> f64 {
        self.constraints
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let (start, n) = (self.offsets[k], self.num_equations_of(k));
                c.calc_cost(y.rows(start, n), self.r.rows(start, n), gamma.rows(start, n))
            })
            .sum()
    }

    fn concatenate(&self, segments: &[DVector<f64>]) -> DVector<f64> {
        let mut out = DVector::zeros(self.num_constraint_equations());
        for (k, s) in segments.iter().enumerate() {
            out.rows_mut(self.offsets[k], s.len()).copy_from(s);
        }
        out
    }
}
