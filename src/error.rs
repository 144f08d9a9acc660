//! Crate-level error type.
//!
//! Each module reports its own error enum; [`FGraphError`] wraps them so that
//! `?` works across module boundaries. Solver outcomes such as divergence or a
//! singular linear system are not errors: they are reported through
//! [`crate::optimizer::OptimizationStatus`].

use crate::{
    core::GraphError, linalg::LinAlgError, manifold::ManifoldError,
    registration::RegistrationError,
};
use thiserror::Error;

/// Main result type used throughout the crate
pub type FGraphResult<T> = Result<T, FGraphError>;

#[derive(Debug, Clone, Error)]
pub enum FGraphError {
    /// Graph construction or query errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Linear algebra errors outside the solve loop
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operations errors
    #[error("Manifold error: {0}")]
    Manifold(#[from] ManifoldError),

    /// Point-set registration errors
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_display() {
        let error = FGraphError::from(GraphError::UnknownNode {
            id: 7,
            node_count: 3,
        });
        assert!(error.to_string().starts_with("Graph error: "));
        assert!(error.to_string().contains('7'));
    }

    #[test]
    fn test_question_mark_conversion() {
        fn fails() -> FGraphResult<()> {
            Err(LinAlgError::SingularMatrix("zero pivot".to_string()))?
        }
        match fails() {
            Err(FGraphError::LinearAlgebra(LinAlgError::SingularMatrix(msg))) => {
                assert_eq!(msg, "zero pivot")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_registration_error_wraps() {
        let error = FGraphError::from(RegistrationError::TooFewPoints { actual: 2 });
        assert!(matches!(error, FGraphError::Registration(_)));
    }
}
