use super::{LinAlgError, LinAlgResult, SparseMatrix};
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::{Mat, Side};
use nalgebra::DVector;
use tracing::debug;

/// Sparse LLᵀ solver for symmetric positive-definite systems.
///
/// The symbolic factorization depends only on the sparsity pattern, which stays
/// fixed while the same graph is being optimized, so it is computed once and
/// reused for every damping value and iteration. A pattern with a different
/// size or nonzero count triggers a fresh analysis. On an append-only graph
/// the pattern only grows, so the key is enough to detect a change.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_pattern: Option<SymbolicLlt<usize>>,
    pattern_shape: (usize, usize),
    symbolic_analyses: usize,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of symbolic analyses performed over this solver's lifetime.
    pub fn symbolic_analyses(&self) -> usize {
        self.symbolic_analyses
    }

    /// Drop the cached symbolic factorization.
    pub fn reset(&mut self) {
        self.symbolic_pattern = None;
        self.pattern_shape = (0, 0);
    }

    /// Solve `A x = b`.
    pub fn solve(&mut self, matrix: &SparseMatrix, rhs: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
        let n = matrix.nrows();
        if matrix.ncols() != n || rhs.len() != n {
            return Err(LinAlgError::DimensionMismatch(format!(
                "matrix {}x{}, rhs {}",
                n,
                matrix.ncols(),
                rhs.len()
            )));
        }

        let nnz: usize = (0..n).map(|col| matrix.val_of_col(col).len()).sum();
        let shape = (n, nnz);
        let symbolic = match &self.symbolic_pattern {
            Some(sym) if self.pattern_shape == shape => sym.clone(),
            _ => {
                debug!("Symbolic Cholesky analysis: n = {}, nnz = {}", shape.0, shape.1);
                let sym = SymbolicLlt::try_new(matrix.symbolic(), Side::Lower).map_err(|e| {
                    LinAlgError::FactorizationFailed(format!("Symbolic Cholesky failed: {e:?}"))
                })?;
                self.symbolic_pattern = Some(sym.clone());
                self.pattern_shape = shape;
                self.symbolic_analyses += 1;
                sym
            }
        };

        let cholesky = Llt::try_new_with_symbolic(symbolic, matrix.as_ref(), Side::Lower)
            .map_err(|e| {
                LinAlgError::FactorizationFailed(format!("Numeric Cholesky failed: {e:?}"))
            })?;

        let b = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let x = cholesky.solve(&b);
        let solution = DVector::from_fn(n, |i, _| x[(i, 0)]);

        if solution.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::SingularMatrix(
                "Cholesky solve produced non-finite values".to_string(),
            ));
        }
        Ok(solution)
    }
}
