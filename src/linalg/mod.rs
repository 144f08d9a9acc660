//! Sparse linear algebra for the Gauss-Newton normal equations.
//!
//! - [`BlockSparseSystem`]: arena of small dense blocks keyed by node pair,
//!   accumulating `JᵀΩJ` and `JᵀΩr` per factor
//! - [`SparseCholeskySolver`]: faer sparse LLᵀ with the symbolic analysis
//!   cached across damping retries and iterations

use thiserror::Error;

pub mod block_system;
pub mod cholesky;

pub use block_system::BlockSparseSystem;
pub use cholesky::SparseCholeskySolver;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (not positive definite, bad pivot, ...)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Solve produced non-finite values
    #[error("Singular matrix detected: {0}")]
    SingularMatrix(String),

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    /// Block or vector dimensions do not agree
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;
