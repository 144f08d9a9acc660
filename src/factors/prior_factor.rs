//! Unary pose prior: pins a node towards an absolute pose measurement.

use super::{Factor, FactorKind, NodeId};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector};

/// Absolute pose measurement `Z` on one node.
///
/// ```text
/// r = Log(Z⁻¹ ∘ X)
/// ∂r/∂X = Jr⁻¹(r)
/// ```
///
/// A prior with a very large information matrix on the first node is the usual
/// way to anchor the gauge of a pose graph.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorFactor<G: LieGroup> {
    node: [NodeId; 1],
    measurement: G,
    information: DMatrix<f64>,
}

impl<G: LieGroup> PriorFactor<G> {
    pub fn new(node: NodeId, measurement: G, information: DMatrix<f64>) -> Self {
        PriorFactor {
            node: [node],
            measurement,
            information,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node[0]
    }
}

impl<G: LieGroup> Factor<G> for PriorFactor<G> {
    fn kind(&self) -> FactorKind {
        FactorKind::UnaryPrior
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node
    }

    fn measurement(&self) -> &G {
        &self.measurement
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    fn linearize(
        &self,
        poses: &[&G],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let residual = self.measurement.between(poses[0], None, None).log(None);
        let jacobian =
            compute_jacobian.then(|| G::jacobian_to_dmatrix(&residual.right_jacobian_inv()));
        (residual.to_dvector(), jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{SE2, SE3, SE3Tangent};
    use nalgebra::Vector6;

    const FD_STEP: f64 = 1e-6;

    #[test]
    fn test_prior_zero_residual_at_measurement() {
        let pose = SE2::from_xy_angle(1.0, 2.0, 0.5);
        let factor = PriorFactor::new(0, pose.clone(), DMatrix::identity(3, 3));
        let (residual, jacobian) = factor.linearize(&[&pose], true);
        assert!(residual.norm() < 1e-12);
        let Some(jacobian) = jacobian else {
            panic!("jacobian requested");
        };
        assert!((jacobian - DMatrix::<f64>::identity(3, 3)).norm() < 1e-9);
        assert!(factor.chi2(&[&pose]) < 1e-20);
    }

    #[test]
    fn test_prior_chi2_uses_information() {
        let factor = PriorFactor::new(0, SE2::identity(), DMatrix::identity(3, 3) * 4.0);
        let pose = SE2::from_xy_angle(0.5, 0.0, 0.0);
        // r = [0.5, 0, 0], rᵀΩr = 4 * 0.25
        assert!((factor.chi2(&[&pose]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_prior_jacobian_finite_difference() {
        let measurement = SE3::from_translation_euler(0.2, -0.1, 0.4, 0.1, 0.2, -0.3);
        let pose = SE3::from_translation_euler(0.5, 0.3, -0.2, -0.4, 0.6, 0.2);
        let factor = PriorFactor::new(0, measurement, DMatrix::identity(6, 6));
        let (residual, jacobian) = factor.linearize(&[&pose], true);
        let Some(jacobian) = jacobian else {
            panic!("jacobian requested");
        };
        for k in 0..6 {
            let mut delta = Vector6::zeros();
            delta[k] = FD_STEP;
            let perturbed = pose.right_plus(&SE3Tangent::from_vector(delta), None, None);
            let (r_plus, _) = factor.linearize(&[&perturbed], false);
            let numeric = (r_plus - &residual) / FD_STEP;
            assert!((numeric - jacobian.column(k)).norm() < 1e-5);
        }
    }
}
