//! Block-sparse accumulation of the normal equations.

use super::{LinAlgError, LinAlgResult, SparseMatrix};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Normal equations `H Δ = -g` stored as dense `block_size x block_size` blocks.
///
/// Only the upper block triangle is kept (`(i, j)` with `i < j`); diagonal blocks
/// always exist so the LM damping term lands on every variable. Blocks are kept
/// in a `BTreeMap`, so the emitted sparse matrix has a deterministic entry order.
#[derive(Debug, Clone)]
pub struct BlockSparseSystem {
    block_size: usize,
    diagonal: Vec<DMatrix<f64>>,
    off_diagonal: BTreeMap<(usize, usize), DMatrix<f64>>,
    gradient: DVector<f64>,
}

impl BlockSparseSystem {
    pub fn new(num_blocks: usize, block_size: usize) -> Self {
        BlockSparseSystem {
            block_size,
            diagonal: vec![DMatrix::zeros(block_size, block_size); num_blocks],
            off_diagonal: BTreeMap::new(),
            gradient: DVector::zeros(num_blocks * block_size),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.diagonal.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of scalar unknowns.
    pub fn dimension(&self) -> usize {
        self.diagonal.len() * self.block_size
    }

    /// `g = Σ JᵀΩr`
    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    /// Number of stored off-diagonal blocks.
    pub fn off_diagonal_blocks(&self) -> usize {
        self.off_diagonal.len()
    }

    /// Accumulate one factor: `H += JᵀΩJ`, `g += JᵀΩr`.
    ///
    /// `jacobian` is `m x (k·block_size)`, its column blocks ordered as `blocks`.
    pub fn add_factor(
        &mut self,
        blocks: &[usize],
        jacobian: &DMatrix<f64>,
        information: &DMatrix<f64>,
        residual: &DVector<f64>,
    ) -> LinAlgResult<()> {
        let bs = self.block_size;
        if jacobian.ncols() != blocks.len() * bs
            || jacobian.nrows() != residual.len()
            || information.shape() != (residual.len(), residual.len())
        {
            return Err(LinAlgError::DimensionMismatch(format!(
                "jacobian {:?}, information {:?}, residual {} for {} blocks of size {bs}",
                jacobian.shape(),
                information.shape(),
                residual.len(),
                blocks.len()
            )));
        }
        if let Some(&bad) = blocks.iter().find(|&&b| b >= self.num_blocks()) {
            return Err(LinAlgError::DimensionMismatch(format!(
                "block {bad} out of range for {} blocks",
                self.num_blocks()
            )));
        }

        let weighted = jacobian.transpose() * information;
        let hessian = &weighted * jacobian;
        let gradient = &weighted * residual;

        for (p, &bp) in blocks.iter().enumerate() {
            let mut g = self.gradient.rows_mut(bp * bs, bs);
            g += gradient.rows(p * bs, bs);

            for (q, &bq) in blocks.iter().enumerate() {
                let block = hessian.view((p * bs, q * bs), (bs, bs));
                if bp == bq {
                    self.diagonal[bp] += block;
                } else if bp < bq {
                    *self
                        .off_diagonal
                        .entry((bp, bq))
                        .or_insert_with(|| DMatrix::zeros(bs, bs)) += block;
                }
            }
        }
        Ok(())
    }

    /// Emit the full symmetric matrix `H + λI` in faer's compressed column format.
    pub fn to_sparse(&self, damping: f64) -> LinAlgResult<SparseMatrix> {
        let bs = self.block_size;
        let n = self.dimension();
        let mut triplets =
            Vec::with_capacity(bs * bs * (self.diagonal.len() + 2 * self.off_diagonal.len()));

        for (i, block) in self.diagonal.iter().enumerate() {
            for c in 0..bs {
                for r in 0..bs {
                    let mut value = block[(r, c)];
                    if r == c {
                        value += damping;
                    }
                    triplets.push(Triplet::new(i * bs + r, i * bs + c, value));
                }
            }
        }
        for (&(i, j), block) in &self.off_diagonal {
            for c in 0..bs {
                for r in 0..bs {
                    let value = block[(r, c)];
                    triplets.push(Triplet::new(i * bs + r, j * bs + c, value));
                    triplets.push(Triplet::new(j * bs + c, i * bs + r, value));
                }
            }
        }

        SparseColMat::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| LinAlgError::SparseMatrixCreation(format!("{e:?}")))
    }

    /// `xᵀHx` without assembling `H`.
    pub fn quadratic_form(&self, x: &DVector<f64>) -> f64 {
        let bs = self.block_size;
        let diagonal: f64 = self
            .diagonal
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let xi = x.rows(i * bs, bs);
                xi.dot(&(block * xi))
            })
            .sum();
        let off_diagonal: f64 = self
            .off_diagonal
            .iter()
            .map(|(&(i, j), block)| 2.0 * x.rows(i * bs, bs).dot(&(block * x.rows(j * bs, bs))))
            .sum();
        diagonal + off_diagonal
    }

    /// Dense copy of `H + λI`; used for small-system diagnostics and tests.
    pub fn to_dense(&self, damping: f64) -> DMatrix<f64> {
        let bs = self.block_size;
        let mut dense = DMatrix::identity(self.dimension(), self.dimension()) * damping;
        for (i, block) in self.diagonal.iter().enumerate() {
            let mut view = dense.view_mut((i * bs, i * bs), (bs, bs));
            view += block;
        }
        for (&(i, j), block) in &self.off_diagonal {
            let mut upper = dense.view_mut((i * bs, j * bs), (bs, bs));
            upper += block;
            let mut lower = dense.view_mut((j * bs, i * bs), (bs, bs));
            lower += block.transpose();
        }
        dense
    }
}
