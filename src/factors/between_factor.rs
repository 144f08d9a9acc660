//! Binary relative-pose factor for odometry and loop-closure edges.

use super::{Factor, FactorKind, NodeId};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DMatrix, DVector};

/// Relative pose measurement `Z` between nodes `i` and `j`.
///
/// ```text
/// r      = Log(Z⁻¹ ∘ Xᵢ⁻¹ ∘ Xⱼ)
/// ∂r/∂Xⱼ = Jr⁻¹(r)
/// ∂r/∂Xᵢ = -Jr⁻¹(r) · Ad(Xⱼ⁻¹ ∘ Xᵢ)
/// ```
///
/// The stacked Jacobian is `DOF x 2·DOF`, block for `i` first.
#[derive(Clone, Debug, PartialEq)]
pub struct BetweenFactor<G: LieGroup> {
    nodes: [NodeId; 2],
    relative_pose: G,
    information: DMatrix<f64>,
}

impl<G: LieGroup> BetweenFactor<G> {
    pub fn new(from: NodeId, to: NodeId, relative_pose: G, information: DMatrix<f64>) -> Self {
        BetweenFactor {
            nodes: [from, to],
            relative_pose,
            information,
        }
    }

    pub fn from_node(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn to_node(&self) -> NodeId {
        self.nodes[1]
    }
}

impl<G: LieGroup> Factor<G> for BetweenFactor<G> {
    fn kind(&self) -> FactorKind {
        FactorKind::BinaryRelative
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    fn measurement(&self) -> &G {
        &self.relative_pose
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    fn linearize(
        &self,
        poses: &[&G],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let predicted = poses[0].between(poses[1], None, None);
        let residual = self.relative_pose.between(&predicted, None, None).log(None);

        let jacobian = compute_jacobian.then(|| {
            let jr_inv = residual.right_jacobian_inv();
            let jac_i = -(jr_inv.clone() * predicted.inverse(None).adjoint());
            let dof = G::DOF;
            let mut stacked = DMatrix::zeros(dof, 2 * dof);
            stacked
                .view_mut((0, 0), (dof, dof))
                .copy_from(&G::jacobian_to_dmatrix(&jac_i));
            stacked
                .view_mut((0, dof), (dof, dof))
                .copy_from(&G::jacobian_to_dmatrix(&jr_inv));
            stacked
        });

        (residual.to_dvector(), jacobian)
    }
}
