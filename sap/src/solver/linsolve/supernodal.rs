//! Block Cholesky factorization with participating cliques as supernodes.
//!
//! The Hessian of the SAP cost is block sparse with dense blocks: one block column per clique
//! and off-diagonal blocks only between cliques coupled by a constraint. We factor it directly
//! in this block structure. The elimination order is a minimum degree ordering of the clique
//! graph and the fill-in is computed symbolically once for a given structure.

use std::collections::{BTreeMap, BTreeSet};

use lazycell::LazyCell;
use na::{DMatrix, DVector};

use super::{LinearSolveError, LinearSolver};
use crate::SymmetricBlockSparseMatrix;

/// Elimination order and factor structure.
#[derive(Clone, Debug, PartialEq)]
struct SymbolicFactorization {
    /// Hessian block eliminated at each step.
    order: Vec<usize>,
    /// Elimination step of each Hessian block.
    position: Vec<usize>,
    /// For each step, the later steps coupled to it in the factor in increasing order.
    pattern: Vec<Vec<usize>>,
    block_sizes: Vec<usize>,
}

impl SymbolicFactorization {
    fn new(hessian: &SymmetricBlockSparseMatrix) -> Self {
        let nb = hessian.num_blocks();
        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nb];
        for j in 0..nb {
            for (i, _) in hessian.column(j).filter(|&(i, _)| i != j) {
                adjacency[i].insert(j);
                adjacency[j].insert(i);
            }
        }

        let mut eliminated = vec![false; nb];
        let mut order = Vec::with_capacity(nb);
        let mut neighbors_at_elimination = Vec::with_capacity(nb);
        // Minimum degree with ties broken by the smallest block index.
        while let Some(p) = (0..nb)
            .filter(|&b| !eliminated[b])
            .min_by_key(|&b| (adjacency[b].len(), b))
        {
            let neighbors: Vec<usize> = adjacency[p].iter().copied().collect();
            for &a in neighbors.iter() {
                adjacency[a].remove(&p);
                adjacency[a].extend(neighbors.iter().copied().filter(|&b| b != a));
            }
            adjacency[p].clear();
            eliminated[p] = true;
            order.push(p);
            neighbors_at_elimination.push(neighbors);
        }

        let mut position = vec![0; nb];
        for (k, &b) in order.iter().enumerate() {
            position[b] = k;
        }
        let pattern = neighbors_at_elimination
            .into_iter()
            .map(|neighbors| {
                let mut steps: Vec<usize> = neighbors.into_iter().map(|b| position[b]).collect();
                steps.sort_unstable();
                steps
            })
            .collect();

        SymbolicFactorization {
            order,
            position,
            pattern,
            block_sizes: hessian.block_sizes(),
        }
    }

    /// Size of the block eliminated at step `k`.
    #[inline]
    fn size(&self, k: usize) -> usize {
        self.block_sizes[self.order[k]]
    }
}

/// Numeric block Cholesky factor `L` in elimination order.
struct NumericFactorization {
    diagonal: Vec<DMatrix<f64>>,
    /// Off-diagonal blocks `L[i, k]` of each column `k` keyed by `i > k`.
    columns: Vec<BTreeMap<usize, DMatrix<f64>>>,
}

#[derive(Debug, Default)]
pub struct SupernodalSolver {
    symbolic: LazyCell<SymbolicFactorization>,
}

impl SupernodalSolver {
    pub fn new() -> Self {
        SupernodalSolver::default()
    }

    fn factor(
        symbolic: &SymbolicFactorization,
        hessian: &SymmetricBlockSparseMatrix,
    ) -> Result<NumericFactorization, LinearSolveError> {
        let nb = symbolic.order.len();

        // Scatter the lower triangle of the Hessian into elimination order.
        let mut columns: Vec<BTreeMap<usize, DMatrix<f64>>> = vec![BTreeMap::new(); nb];
        for j in 0..nb {
            for (i, block) in hessian.column(j) {
                let (pi, pj) = (symbolic.position[i], symbolic.position[j]);
                if pi >= pj {
                    columns[pj].insert(pi, block.clone());
                } else {
                    columns[pi].insert(pj, block.transpose());
                }
            }
        }
        for (k, pattern) in symbolic.pattern.iter().enumerate() {
            for &i in pattern.iter() {
                let (rows, cols) = (symbolic.size(i), symbolic.size(k));
                columns[k]
                    .entry(i)
                    .or_insert_with(|| DMatrix::zeros(rows, cols));
            }
        }

        let mut diagonal = Vec::with_capacity(nb);
        for k in 0..nb {
            let (left, right) = columns.split_at_mut(k + 1);
            let column = &mut left[k];

            let w_kk = column
                .remove(&k)
                .unwrap_or_else(|| DMatrix::zeros(symbolic.size(k), symbolic.size(k)));
            let l_kk = w_kk
                .cholesky()
                .ok_or(LinearSolveError::NotPositiveDefinite)?
                .unpack();

            // L[i, k] = W[i, k] L[k, k]⁻ᵀ
            for l_ik in column.values_mut() {
                *l_ik = l_kk
                    .solve_lower_triangular(&l_ik.transpose())
                    .ok_or(LinearSolveError::NotPositiveDefinite)?
                    .transpose();
            }

            // Schur complement update of the trailing blocks.
            for (&i, l_ik) in column.iter() {
                for (&j, l_jk) in column.range(..=i) {
                    let target = right[j - k - 1]
                        .entry(i)
                        .or_insert_with(|| DMatrix::zeros(l_ik.nrows(), l_jk.nrows()));
                    target.gemm(-1.0, l_ik, &l_jk.transpose(), 1.0);
                }
            }
            diagonal.push(l_kk);
        }

        Ok(NumericFactorization { diagonal, columns })
    }
}

impl LinearSolver for SupernodalSolver {
    fn solve(
        &mut self,
        hessian: &SymmetricBlockSparseMatrix,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolveError> {
        let stale = self
            .symbolic
            .borrow()
            .map_or(false, |symbolic| symbolic.block_sizes != hessian.block_sizes());
        if stale {
            self.symbolic = LazyCell::new();
        }
        let symbolic = self
            .symbolic
            .borrow_with(|| SymbolicFactorization::new(hessian));
        let factor = Self::factor(symbolic, hessian)?;

        let mut z: Vec<DVector<f64>> = symbolic
            .order
            .iter()
            .map(|&b| rhs.rows(hessian.block_start(b), hessian.block_size(b)).clone_owned())
            .collect();

        // Forward substitution L z = b.
        for (k, l_kk) in factor.diagonal.iter().enumerate() {
            let zk = l_kk
                .solve_lower_triangular(&z[k])
                .ok_or(LinearSolveError::NotPositiveDefinite)?;
            for (&i, l_ik) in factor.columns[k].iter() {
                z[i].gemv(-1.0, l_ik, &zk, 1.0);
            }
            z[k] = zk;
        }

        // Backward substitution Lᵀ x = z.
        for (k, l_kk) in factor.diagonal.iter().enumerate().rev() {
            let mut rhs_k = z[k].clone();
            for (&i, l_ik) in factor.columns[k].iter() {
                rhs_k.gemv_tr(-1.0, l_ik, &z[i], 1.0);
            }
            z[k] = l_kk
                .tr_solve_lower_triangular(&rhs_k)
                .ok_or(LinearSolveError::NotPositiveDefinite)?;
        }

        let mut x = DVector::zeros(rhs.len());
        for (&b, zk) in symbolic.order.iter().zip(z.iter()) {
            x.rows_mut(hessian.block_start(b), zk.len()).copy_from(zk);
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::linsolve::tests::make_block_matrix;

    #[test]
    fn minimum_degree_order() {
        // Path 0 - 1 - 2 with a single leaf 3 attached to 1.
        let mut h = SymmetricBlockSparseMatrix::new(&[1, 1, 1, 1]);
        let one = DMatrix::from_element(1, 1, 1.0);
        for b in 0..4 {
            h.add_to_block(b, b, &(&one * 4.0));
        }
        h.add_to_block(1, 0, &one);
        h.add_to_block(2, 1, &one);
        h.add_to_block(3, 1, &one);
        let symbolic = SymbolicFactorization::new(&h);
        // Eliminating a tree from its leaves produces no fill.
        assert_eq!(symbolic.order, vec![0, 2, 1, 3]);
        assert_eq!(symbolic.pattern, vec![vec![2], vec![2], vec![3], vec![]]);
    }

    #[test]
    fn fill_in() {
        let h = make_block_matrix();
        let symbolic = SymbolicFactorization::new(&h);
        // The coupling between the first and the last block closes a cycle, so eliminating any
        // block creates fill between its two neighbors.
        let first = symbolic.order[0];
        assert_eq!(symbolic.pattern[0].len(), 2);
        assert_eq!(symbolic.position[first], 0);
        let total: usize = symbolic.pattern.iter().map(|p| p.len()).sum();
        // A cycle of 5 nodes has a chordal completion with 5 + 2 edges.
        assert_eq!(total, 7);
    }
}
