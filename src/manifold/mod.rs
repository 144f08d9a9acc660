//! Lie group representations of rigid motions used as pose states.
//!
//! Lie group M,° | size   | dim | X ∈ M             | Constraint | T_X M         | Exp(T)        | Comp. | Action
//! ------------- | ------ | --- | ----------------- | ---------- | ------------- | ------------- | ----- | ------
//! Rotation      | SO(2),.| 1   | z ∈ C             | z*z = 1    | θ ∈ R         | z = exp(iθ)   | z₁z₂  | zx
//! Rigid motion  | SE(2),.| 3   | M = [R t; 0 1]    | RᵀR = I    | [ρ, θ] ∈ R³   | Exp([v̂])      | M₁M₂  | Rx+t
//! Rotation      | SO(3),.| 3   | q ∈ H             | q*q = 1    | θ ∈ R³        | q = exp(uθ/2) | q₁q₂  | qxq*
//! Rigid motion  | SE(3),.| 6   | M = [R t; 0 1]    | RᵀR = I    | [ρ, θ] ∈ R⁶   | Exp([v̂])      | M₁M₂  | Rx+t
//!
//! All Jacobians follow the right-perturbation convention `X ⊞ δ = X ∘ Exp(δ)`,
//! which is the same convention used by the optimizer when retracting increments.

use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;
use std::ops::{Mul, Neg};
use thiserror::Error;

pub mod se2;
pub mod se3;
pub mod so2;
pub mod so3;

pub use se2::{SE2, SE2Tangent};
pub use se3::{SE3, SE3Tangent};
pub use so2::{SO2, SO2Tangent};
pub use so3::{SO3, SO3Tangent};

/// Angles below this threshold use Taylor expansions instead of closed forms.
pub(crate) const SMALL_ANGLE: f64 = 1e-4;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    #[error("Invalid tangent dimension: expected {expected}, got {actual}")]
    InvalidTangentDimension { expected: usize, actual: usize },

    /// Tangent vector contains NaN or infinite components
    #[error("Non-finite tangent vector: {0}")]
    NonFiniteTangent(String),
}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Core trait for Lie group operations.
///
/// Elements are values of the implementing type itself, so a pose graph node can
/// store `G` directly. Jacobians are optional out-parameters: callers that only
/// need the group result pass `None` and pay nothing for derivative computation.
///
/// Three dimensions characterize each group:
/// - `DIM`: dimension of the space the group acts on (2 or 3)
/// - `DOF`: tangent space dimension
/// - `REP_SIZE`: size of the stored representation
pub trait LieGroup: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Tangent space vector type
    type TangentVector: Tangent<Self>;

    /// Square `DOF x DOF` Jacobian matrix type
    type JacobianMatrix: Clone
        + Debug
        + PartialEq
        + Neg<Output = Self::JacobianMatrix>
        + Mul<Output = Self::JacobianMatrix>;

    /// Matrix form of a Lie algebra element
    type LieAlgebra: Clone + Debug + PartialEq;

    /// Point type the group acts on
    type Point: Clone + Debug + PartialEq + Send + Sync;

    const DIM: usize;
    const DOF: usize;
    const REP_SIZE: usize;

    /// Neutral element e such that e ∘ g = g ∘ e = g.
    fn identity() -> Self;

    /// Identity matrix in Jacobian dimensions.
    fn jacobian_identity() -> Self::JacobianMatrix;

    /// Inverse g⁻¹ with optional Jacobian ∂(g⁻¹)/∂g = -Ad(g).
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self;

    /// Group multiplication g₁ ∘ g₂. The rotation part of the result is re-normalized.
    ///
    /// # Arguments
    /// * `jacobian_self` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₁ = Ad(g₂⁻¹)
    /// * `jacobian_other` - Optional Jacobian ∂(g₁ ∘ g₂)/∂g₂ = I
    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Logarithmic map to the tangent space, with optional Jacobian Jr⁻¹(τ).
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Act on a point: g ⊙ p.
    fn act(&self, point: &Self::Point) -> Self::Point;

    /// Adjoint matrix Ad(g), mapping tangent vectors at g to tangent vectors at e.
    fn adjoint(&self) -> Self::JacobianMatrix;

    /// Random element (test data and initialization).
    fn random() -> Self;

    /// Project the element back onto the manifold.
    fn normalize(&mut self);

    /// Check that the element satisfies the group constraints within `tolerance`.
    fn is_valid(&self, tolerance: f64) -> bool;

    /// Copy a Jacobian into a dynamically sized matrix for sparse assembly.
    fn jacobian_to_dmatrix(jacobian: &Self::JacobianMatrix) -> DMatrix<f64>;

    /// Right plus: g ⊞ τ = g ∘ Exp(τ).
    ///
    /// # Arguments
    /// * `jacobian_self` - Optional Jacobian ∂(g ⊞ τ)/∂g = Ad(Exp(τ))⁻¹
    /// * `jacobian_tangent` - Optional Jacobian ∂(g ⊞ τ)/∂τ = Jr(τ)
    fn right_plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let delta = tangent.exp(None);
        if let Some(jac) = jacobian_self {
            *jac = delta.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_tangent {
            *jac = tangent.right_jacobian();
        }
        self.compose(&delta, None, None)
    }

    /// Right minus: g₁ ⊟ g₂ = Log(g₂⁻¹ ∘ g₁).
    ///
    /// # Arguments
    /// * `jacobian_self` - Optional Jacobian wrt g₁, Jr⁻¹(τ)
    /// * `jacobian_other` - Optional Jacobian wrt g₂, -Jl⁻¹(τ)
    fn right_minus(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        let tangent = other.inverse(None).compose(self, None, None).log(None);
        if let Some(jac) = jacobian_self {
            *jac = tangent.right_jacobian_inv();
        }
        if let Some(jac) = jacobian_other {
            *jac = -tangent.left_jacobian_inv();
        }
        tangent
    }

    /// Relative motion g₁⁻¹ ∘ g₂.
    ///
    /// # Arguments
    /// * `jacobian_self` - Optional Jacobian wrt g₁, -Ad(g₂⁻¹ ∘ g₁)
    /// * `jacobian_other` - Optional Jacobian wrt g₂, I
    fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let result = self.inverse(None).compose(other, None, None);
        if let Some(jac) = jacobian_self {
            *jac = -result.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_other {
            *jac = Self::jacobian_identity();
        }
        result
    }

    /// Apply the motion to a batch of points.
    fn transform_points(&self, points: &[Self::Point]) -> Vec<Self::Point> {
        points.iter().map(|p| self.act(p)).collect()
    }
}

/// Operations on tangent vectors (Lie algebra elements in vector form).
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq + Send + Sync {
    /// Dimension of the tangent space (same as Lie group DOF)
    const DIM: usize = G::DOF;

    /// Exponential map Exp(τ), with optional Jacobian Jr(τ).
    fn exp(&self, jacobian: Option<&mut G::JacobianMatrix>) -> G;

    /// Right Jacobian Jr: Exp(τ + δ) ≈ Exp(τ) ∘ Exp(Jr δ).
    fn right_jacobian(&self) -> G::JacobianMatrix;

    /// Left Jacobian Jl: Exp(τ + δ) ≈ Exp(Jl δ) ∘ Exp(τ).
    fn left_jacobian(&self) -> G::JacobianMatrix;

    fn right_jacobian_inv(&self) -> G::JacobianMatrix;

    fn left_jacobian_inv(&self) -> G::JacobianMatrix;

    /// Hat operator τ^∧ (vector to Lie algebra matrix).
    fn hat(&self) -> G::LieAlgebra;

    fn zero() -> Self;

    fn random() -> Self;

    fn is_zero(&self, tolerance: f64) -> bool;

    /// Euclidean norm of the coefficient vector.
    fn norm(&self) -> f64;

    /// Build a tangent vector from `DOF` coefficients.
    fn from_slice(values: &[f64]) -> ManifoldResult<Self>;

    /// Coefficients as a dynamically sized vector.
    fn to_dvector(&self) -> DVector<f64>;
}

/// Check length and finiteness of raw tangent coefficients.
pub(crate) fn check_tangent_slice(values: &[f64], expected: usize) -> ManifoldResult<()> {
    if values.len() != expected {
        return Err(ManifoldError::InvalidTangentDimension {
            expected,
            actual: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ManifoldError::NonFiniteTangent(format!("{values:?}")));
    }
    Ok(())
}
