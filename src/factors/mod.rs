//! Factors: weighted residual constraints over one or two pose nodes.
//!
//! A factor reads the current poses of the nodes it references (by index) and
//! produces a residual `r` together with the stacked Jacobian `[∂r/∂x₁ | ∂r/∂x₂]`
//! taken with respect to right perturbations `xₖ ⊞ δₖ`. Its contribution to the
//! total cost is `rᵀ Ω r` where `Ω` is the information matrix.
//!
//! The set of factor kinds is closed ([`FactorKind`]), but dispatch goes through
//! the [`Factor`] capability trait so the graph can hold mixed kinds in one list.

use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector};
use std::fmt;

pub mod between_factor;
pub mod prior_factor;

pub use between_factor::BetweenFactor;
pub use prior_factor::PriorFactor;

/// Dense index of a node, assigned in insertion order starting at 0.
pub type NodeId = usize;

/// Which kind of constraint a factor represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    /// Absolute pose measurement on a single node
    UnaryPrior,
    /// Relative pose measurement between two nodes
    BinaryRelative,
}

impl FactorKind {
    /// Number of nodes a factor of this kind references.
    pub fn arity(&self) -> usize {
        match self {
            FactorKind::UnaryPrior => 1,
            FactorKind::BinaryRelative => 2,
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorKind::UnaryPrior => write!(f, "unary prior"),
            FactorKind::BinaryRelative => write!(f, "binary relative"),
        }
    }
}

/// Capability interface shared by all factor kinds.
pub trait Factor<G: LieGroup>: Send + Sync {
    fn kind(&self) -> FactorKind;

    /// Referenced nodes, in the order their Jacobian blocks are stacked.
    fn node_ids(&self) -> &[NodeId];

    /// Observed pose (absolute for priors, relative for binary factors).
    fn measurement(&self) -> &G;

    /// Symmetric positive-semidefinite weight `Ω` of size `dimension x dimension`.
    fn information(&self) -> &DMatrix<f64>;

    /// Residual dimension.
    fn get_dimension(&self) -> usize {
        G::DOF
    }

    /// Evaluate the residual and, if requested, the stacked Jacobian.
    ///
    /// `poses` holds the current states of [`Factor::node_ids`] in the same order.
    fn linearize(
        &self,
        poses: &[&G],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>);

    /// Weighted squared residual `rᵀ Ω r`.
    fn chi2(&self, poses: &[&G]) -> f64 {
        let (residual, _) = self.linearize(poses, false);
        weighted_norm_squared(&residual, self.information())
    }
}

/// rᵀ Ω r
pub fn weighted_norm_squared(residual: &DVector<f64>, information: &DMatrix<f64>) -> f64 {
    residual.dot(&(information * residual))
}
