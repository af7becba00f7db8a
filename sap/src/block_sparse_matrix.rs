//! Block sparse matrices with dense blocks.
//!
//! Constraint Jacobians and the SAP Hessian have a block structure inherited from cliques: each
//! block column corresponds to a clique and each nonzero block is dense. Instead of a general
//! sparse format we store an arena of dense blocks indexed by block row and block column.

use std::collections::BTreeMap;

use na::{DMatrix, DVector};

use crate::Error;

fn offsets(sizes: &[usize]) -> Vec<usize> {
    let mut starts = Vec::with_capacity(sizes.len() + 1);
    let mut n = 0;
    starts.push(0);
    for &s in sizes {
        n += s;
        starts.push(n);
    }
    starts
}

/// A single dense block of a [`BlockSparseMatrix`].
#[derive(Clone, Debug, PartialEq)]
pub struct MatrixBlock {
    pub block_row: usize,
    pub block_col: usize,
    pub value: DMatrix<f64>,
}

/// A rectangular matrix composed of dense blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSparseMatrix {
    row_starts: Vec<usize>,
    col_starts: Vec<usize>,
    blocks: Vec<MatrixBlock>,
    /// Indices into `blocks` for each block row.
    row_blocks: Vec<Vec<usize>>,
}

impl BlockSparseMatrix {
    pub fn new(row_block_sizes: &[usize], col_block_sizes: &[usize]) -> Self {
        BlockSparseMatrix {
            row_starts: offsets(row_block_sizes),
            col_starts: offsets(col_block_sizes),
            blocks: Vec::new(),
            row_blocks: vec![Vec::new(); row_block_sizes.len()],
        }
    }

    /// Inserts a dense block at block position `(block_row, block_col)`.
    ///
    /// The block must have the size of its block row and block column and must not already
    /// exist.
    pub fn add_block(
        &mut self,
        block_row: usize,
        block_col: usize,
        value: DMatrix<f64>,
    ) -> Result<(), Error> {
        if block_row >= self.num_block_rows() {
            return Err(Error::OutOfRange {
                index: block_row,
                size: self.num_block_rows(),
            });
        }
        if block_col >= self.num_block_cols() {
            return Err(Error::OutOfRange {
                index: block_col,
                size: self.num_block_cols(),
            });
        }
        if value.nrows() != self.block_row_size(block_row) {
            return Err(Error::SizeMismatch {
                expected: self.block_row_size(block_row),
                actual: value.nrows(),
            });
        }
        if value.ncols() != self.block_col_size(block_col) {
            return Err(Error::SizeMismatch {
                expected: self.block_col_size(block_col),
                actual: value.ncols(),
            });
        }
        if self.row_blocks[block_row]
            .iter()
            .any(|&b| self.blocks[b].block_col == block_col)
        {
            return Err(Error::invalid_argument(format!(
                "block ({}, {}) already exists",
                block_row, block_col
            )));
        }
        self.row_blocks[block_row].push(self.blocks.len());
        self.blocks.push(MatrixBlock {
            block_row,
            block_col,
            value,
        });
        Ok(())
    }

    #[inline]
    pub fn rows(&self) -> usize {
        *self.row_starts.last().unwrap_or(&0)
    }

    #[inline]
    pub fn cols(&self) -> usize {
        *self.col_starts.last().unwrap_or(&0)
    }

    #[inline]
    pub fn num_block_rows(&self) -> usize {
        self.row_starts.len() - 1
    }

    #[inline]
    pub fn num_block_cols(&self) -> usize {
        self.col_starts.len() - 1
    }

    #[inline]
    pub fn row_start(&self, block_row: usize) -> usize {
        self.row_starts[block_row]
    }

    #[inline]
    pub fn col_start(&self, block_col: usize) -> usize {
        self.col_starts[block_col]
    }

    #[inline]
    pub fn block_row_size(&self, block_row: usize) -> usize {
        self.row_starts[block_row + 1] - self.row_starts[block_row]
    }

    #[inline]
    pub fn block_col_size(&self, block_col: usize) -> usize {
        self.col_starts[block_col + 1] - self.col_starts[block_col]
    }

    #[inline]
    pub fn blocks(&self) -> &[MatrixBlock] {
        &self.blocks
    }

    /// Iterates over the blocks in the given block row.
    pub fn block_row(&self, block_row: usize) -> impl Iterator<Item = &MatrixBlock> + '_ {
        self.row_blocks[block_row].iter().map(move |&b| &self.blocks[b])
    }

    /// Computes `y = A x`.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.cols());
        let mut y = DVector::zeros(self.rows());
        for block in self.blocks.iter() {
            let r = self.row_start(block.block_row);
            let c = self.col_start(block.block_col);
            let xc = x.rows(c, block.value.ncols());
            let mut yr = y.rows_mut(r, block.value.nrows());
            yr.gemv(1.0, &block.value, &xc, 1.0);
        }
        y
    }

    /// Computes `y = Aᵀ x`.
    pub fn transpose_mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.rows());
        let mut y = DVector::zeros(self.cols());
        for block in self.blocks.iter() {
            let r = self.row_start(block.block_row);
            let c = self.col_start(block.block_col);
            let xr = x.rows(r, block.value.nrows());
            let mut yc = y.rows_mut(c, block.value.ncols());
            yc.gemv_tr(1.0, &block.value, &xr, 1.0);
        }
        y
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows(), self.cols());
        for block in self.blocks.iter() {
            let r = self.row_start(block.block_row);
            let c = self.col_start(block.block_col);
            dense
                .view_mut((r, c), block.value.shape())
                .copy_from(&block.value);
        }
        dense
    }

    /// Converts this matrix into a compressed sparse row matrix.
    pub fn to_sprs(&self) -> sprs::CsMat<f64> {
        let mut triplets = sprs::TriMat::new((self.rows(), self.cols()));
        for block in self.blocks.iter() {
            let r = self.row_start(block.block_row);
            let c = self.col_start(block.block_col);
            for (j, col) in block.value.column_iter().enumerate() {
                for (i, &v) in col.iter().enumerate() {
                    triplets.add_triplet(r + i, c + j, v);
                }
            }
        }
        triplets.to_csr()
    }
}

/// A square symmetric matrix composed of dense blocks.
///
/// Only blocks on and below the block diagonal are stored, grouped by block column.
#[derive(Clone, Debug, PartialEq)]
pub struct SymmetricBlockSparseMatrix {
    starts: Vec<usize>,
    /// For each block column `j`, the blocks `(i, j)` with `i >= j` keyed by `i`.
    columns: Vec<BTreeMap<usize, DMatrix<f64>>>,
}

impl SymmetricBlockSparseMatrix {
    /// Creates a block diagonal matrix of zero blocks with the given sizes.
    pub fn new(block_sizes: &[usize]) -> Self {
        let columns: Vec<BTreeMap<usize, DMatrix<f64>>> = block_sizes
            .iter()
            .enumerate()
            .map(|(j, &n)| std::iter::once((j, DMatrix::zeros(n, n))).collect())
            .collect();
        SymmetricBlockSparseMatrix {
            starts: offsets(block_sizes),
            columns,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        *self.starts.last().unwrap_or(&0)
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn block_start(&self, b: usize) -> usize {
        self.starts[b]
    }

    #[inline]
    pub fn block_size(&self, b: usize) -> usize {
        self.starts[b + 1] - self.starts[b]
    }

    pub fn block_sizes(&self) -> Vec<usize> {
        (0..self.num_blocks()).map(|b| self.block_size(b)).collect()
    }

    /// Adds `value` to block `(i, j)`.
    ///
    /// Blocks above the diagonal are transposed and added to the mirrored block.
    pub fn add_to_block(&mut self, i: usize, j: usize, value: &DMatrix<f64>) {
        let (i, j, transpose) = if i >= j { (i, j, false) } else { (j, i, true) };
        let (rows, cols) = (self.block_size(i), self.block_size(j));
        let block = self.columns[j]
            .entry(i)
            .or_insert_with(|| DMatrix::zeros(rows, cols));
        if transpose {
            *block += value.transpose();
        } else {
            *block += value;
        }
    }

    /// Block `(i, j)` with `i >= j` if it is structurally nonzero.
    pub fn lower_block(&self, i: usize, j: usize) -> Option<&DMatrix<f64>> {
        self.columns.get(j).and_then(|col| col.get(&i))
    }

    /// Iterates over the stored blocks `(i, block)` of block column `j`, diagonal first.
    pub fn column(&self, j: usize) -> impl Iterator<Item = (usize, &DMatrix<f64>)> + '_ {
        self.columns[j].iter().map(|(&i, b)| (i, b))
    }

    /// Computes `y = A x`.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.size());
        let mut y = DVector::zeros(self.size());
        for (j, col) in self.columns.iter().enumerate() {
            let cj = self.block_start(j);
            for (&i, block) in col.iter() {
                let ci = self.block_start(i);
                let xj = x.rows(cj, block.ncols()).clone_owned();
                y.rows_mut(ci, block.nrows()).gemv(1.0, block, &xj, 1.0);
                if i != j {
                    let xi = x.rows(ci, block.nrows()).clone_owned();
                    y.rows_mut(cj, block.ncols()).gemv_tr(1.0, block, &xi, 1.0);
                }
            }
        }
        y
    }

    /// Expands the full symmetric matrix into a dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.size();
        let mut dense = DMatrix::zeros(n, n);
        for (j, col) in self.columns.iter().enumerate() {
            let cj = self.block_start(j);
            for (&i, block) in col.iter() {
                let ci = self.block_start(i);
                dense.view_mut((ci, cj), block.shape()).copy_from(block);
                if i != j {
                    dense
                        .view_mut((cj, ci), (block.ncols(), block.nrows()))
                        .copy_from(&block.transpose());
                }
            }
        }
        dense
    }

    /// Converts the full symmetric matrix into compressed sparse column format.
    pub fn to_sprs_csc(&self) -> sprs::CsMat<f64> {
        let n = self.size();
        let mut triplets = sprs::TriMat::new((n, n));
        for (j, col) in self.columns.iter().enumerate() {
            let cj = self.block_start(j);
            for (&i, block) in col.iter() {
                let ci = self.block_start(i);
                for (c, column) in block.column_iter().enumerate() {
                    for (r, &v) in column.iter().enumerate() {
                        triplets.add_triplet(ci + r, cj + c, v);
                        if i != j {
                            triplets.add_triplet(cj + c, ci + r, v);
                        }
                    }
                }
            }
        }
        triplets.to_csc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_jacobian() -> Result<BlockSparseMatrix, Error> {
        // Two block rows (3 and 1 rows), three block columns (2, 1, 2 columns).
        let mut j = BlockSparseMatrix::new(&[3, 1], &[2, 1, 2]);
        j.add_block(
            0,
            0,
            DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        )?;
        j.add_block(0, 2, DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]))?;
        j.add_block(1, 1, DMatrix::from_row_slice(1, 1, &[-2.0]))?;
        Ok(j)
    }

    #[test]
    fn products_match_dense() -> Result<(), Error> {
        let j = make_jacobian()?;
        let dense = j.to_dense();
        assert_eq!(dense.shape(), (4, 5));

        let x = DVector::from_vec(vec![1.0, -1.0, 0.5, 2.0, 3.0]);
        assert_relative_eq!(j.mul_vec(&x), &dense * &x, epsilon = 1e-14);

        let y = DVector::from_vec(vec![0.3, -0.7, 1.1, 2.0]);
        assert_relative_eq!(j.transpose_mul_vec(&y), dense.transpose() * &y, epsilon = 1e-14);

        let csr = j.to_sprs();
        assert_eq!(csr.rows(), 4);
        assert_eq!(csr.cols(), 5);
        assert_eq!(csr.get(1, 4), Some(&1.0));
        Ok(())
    }

    #[test]
    fn invalid_blocks_are_rejected() -> Result<(), Error> {
        let mut j = make_jacobian()?;
        assert!(matches!(
            j.add_block(1, 0, DMatrix::zeros(2, 2)),
            Err(Error::SizeMismatch { .. })
        ));
        assert!(matches!(
            j.add_block(0, 0, DMatrix::zeros(3, 2)),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            j.add_block(2, 0, DMatrix::zeros(3, 2)),
            Err(Error::OutOfRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn symmetric_blocks() {
        let mut h = SymmetricBlockSparseMatrix::new(&[2, 1]);
        h.add_to_block(0, 0, &DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]));
        h.add_to_block(1, 1, &DMatrix::from_element(1, 1, 2.0));
        // Upper block is mirrored.
        h.add_to_block(0, 1, &DMatrix::from_row_slice(2, 1, &[0.5, -0.5]));

        let dense = h.to_dense();
        let expected =
            DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, -0.5, 0.5, -0.5, 2.0]);
        assert_relative_eq!(dense, expected);
        assert!(h.lower_block(1, 0).is_some());
        assert!(h.lower_block(0, 1).is_none());

        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_relative_eq!(h.mul_vec(&x), &expected * &x, epsilon = 1e-14);

        let csc = h.to_sprs_csc();
        assert_eq!(csc.get(0, 2), Some(&0.5));
        assert_eq!(csc.get(2, 0), Some(&0.5));
    }
}
