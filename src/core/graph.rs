//! Pose graph: node storage, factor bookkeeping and linearization.

use crate::error::FGraphResult;
use crate::factors::{BetweenFactor, Factor, FactorKind, NodeId, PriorFactor};
use crate::linalg::{BlockSparseSystem, SparseCholeskySolver};
use crate::manifold::LieGroup;
use crate::optimizer::{OptimizerType, SolveOutcome, SolverConfig};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Index of a factor in insertion order.
pub type FactorId = usize;

/// Relative tolerance for symmetry and positive-semidefiniteness checks.
const INFORMATION_TOLERANCE: f64 = 1e-9;

/// Structural errors, raised at the offending call before any mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Unknown node {id}: graph has {node_count} nodes")]
    UnknownNode { id: NodeId, node_count: usize },

    #[error("Nodes must be added in order: expected id {expected}, got {actual}")]
    OutOfOrderNode { expected: NodeId, actual: NodeId },

    #[error("Binary factor references node {id} twice")]
    SelfLoop { id: NodeId },

    #[error("Information matrix is {actual_rows}x{actual_cols}, residual dimension is {expected}")]
    InformationDimensionMismatch {
        expected: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("Invalid information matrix: {0}")]
    InvalidInformation(String),

    #[error("State holds {actual} poses, graph has {expected} nodes")]
    StateLengthMismatch { expected: usize, actual: usize },

    #[error("Factor of kind {kind} references {actual} nodes")]
    ArityMismatch { kind: FactorKind, actual: usize },
}

/// Result type for graph construction.
pub type GraphResult<T> = Result<T, GraphError>;

/// A graph-owned pose variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<G: LieGroup> {
    id: NodeId,
    pose: G,
}

impl<G: LieGroup> Node<G> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn pose(&self) -> &G {
        &self.pose
    }

    /// Tangent space dimension of the node.
    pub fn dimension(&self) -> usize {
        G::DOF
    }
}

/// Summary of graph size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStatistics {
    pub num_nodes: usize,
    pub num_factors: usize,
    pub num_unary_factors: usize,
    pub num_binary_factors: usize,
    pub state_dimension: usize,
    pub residual_dimension: usize,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FactorGraph Statistics:\n\
             Nodes: {} (state dimension: {})\n\
             Factors: {} (unary: {}, binary: {})\n\
             Residual dimension: {}",
            self.num_nodes,
            self.state_dimension,
            self.num_factors,
            self.num_unary_factors,
            self.num_binary_factors,
            self.residual_dimension
        )
    }
}

/// Factor graph over poses of a single Lie group `G`.
///
/// Nodes and factors are append-only. Factors refer to nodes by index, and
/// their insertion order fixes the summation order of the normal equations.
///
/// The graph keeps its sparse Cholesky solver between solves, so re-solving
/// after appending measurements reuses the current poses as the initial guess
/// and only repeats the symbolic analysis when the sparsity pattern grew.
pub struct FactorGraph<G: LieGroup> {
    nodes: Vec<Node<G>>,
    factors: Vec<Box<dyn Factor<G>>>,
    linear_solver: SparseCholeskySolver,
}

impl<G: LieGroup> Default for FactorGraph<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: LieGroup> fmt::Debug for FactorGraph<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorGraph")
            .field("nodes", &self.nodes.len())
            .field("factors", &self.factors.len())
            .finish()
    }
}

impl<G: LieGroup> FactorGraph<G> {
    pub fn new() -> Self {
        FactorGraph {
            nodes: Vec::new(),
            factors: Vec::new(),
            linear_solver: SparseCholeskySolver::new(),
        }
    }

    pub fn with_capacity(nodes: usize, factors: usize) -> Self {
        FactorGraph {
            nodes: Vec::with_capacity(nodes),
            factors: Vec::with_capacity(factors),
            linear_solver: SparseCholeskySolver::new(),
        }
    }

    /// Append a node and return its id (0-based, sequential).
    pub fn add_node(&mut self, initial_pose: G) -> NodeId {
        let id = self.nodes.len();
        let mut pose = initial_pose;
        pose.normalize();
        self.nodes.push(Node { id, pose });
        id
    }

    /// Append a node whose id comes from an external record.
    ///
    /// The id must be exactly the next sequential id.
    pub fn add_node_with_id(&mut self, id: NodeId, initial_pose: G) -> GraphResult<NodeId> {
        let expected = self.nodes.len();
        if id != expected {
            return Err(GraphError::OutOfOrderNode {
                expected,
                actual: id,
            });
        }
        Ok(self.add_node(initial_pose))
    }

    /// Add an absolute pose prior on `node`.
    pub fn add_unary_factor(
        &mut self,
        pose: G,
        node: NodeId,
        information: DMatrix<f64>,
    ) -> GraphResult<FactorId> {
        self.add_factor(Box::new(PriorFactor::new(node, pose, information)))
    }

    /// Add a relative pose observation between `from` and `to`.
    pub fn add_binary_factor(
        &mut self,
        relative_observation: G,
        from: NodeId,
        to: NodeId,
        information: DMatrix<f64>,
    ) -> GraphResult<FactorId> {
        self.add_factor(Box::new(BetweenFactor::new(
            from,
            to,
            relative_observation,
            information,
        )))
    }

    /// Add a relative pose observation and re-initialize `to` as `pose(from) ∘ observation`.
    ///
    /// Useful when ingesting odometry chains: the initial guess of each new node
    /// is dead-reckoned from its predecessor.
    pub fn add_odometry_factor(
        &mut self,
        relative_observation: G,
        from: NodeId,
        to: NodeId,
        information: DMatrix<f64>,
    ) -> GraphResult<FactorId> {
        let target = self
            .pose(from)
            .map(|origin| origin.compose(&relative_observation, None, None));
        let id = self.add_binary_factor(relative_observation, from, to, information)?;
        if let Some(target) = target {
            self.nodes[to].pose = target;
        }
        Ok(id)
    }

    /// Add any factor after validating node references and the information matrix.
    pub fn add_factor(&mut self, factor: Box<dyn Factor<G>>) -> GraphResult<FactorId> {
        let ids = factor.node_ids();
        if ids.len() != factor.kind().arity() {
            return Err(GraphError::ArityMismatch {
                kind: factor.kind(),
                actual: ids.len(),
            });
        }
        for &id in ids {
            self.check_node(id)?;
        }
        if let [a, b] = ids
            && a == b
        {
            return Err(GraphError::SelfLoop { id: *a });
        }
        validate_information(factor.information(), factor.get_dimension())?;

        let id = self.factors.len();
        self.factors.push(factor);
        Ok(id)
    }

    fn check_node(&self, id: NodeId) -> GraphResult<()> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode {
                id,
                node_count: self.nodes.len(),
            })
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<G>> {
        self.nodes.get(id)
    }

    pub fn pose(&self, id: NodeId) -> Option<&G> {
        self.nodes.get(id).map(|n| &n.pose)
    }

    pub fn nodes(&self) -> &[Node<G>] {
        &self.nodes
    }

    /// Snapshot of all current poses, indexed by node id.
    pub fn poses(&self) -> Vec<G> {
        self.nodes.iter().map(|n| n.pose.clone()).collect()
    }

    pub fn factors(&self) -> impl Iterator<Item = &dyn Factor<G>> {
        self.factors.iter().map(|f| f.as_ref())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn factor_count(&self) -> usize {
        self.factors.len()
    }

    /// Number of scalar unknowns in the linearized system.
    pub fn state_dimension(&self) -> usize {
        self.nodes.len() * G::DOF
    }

    pub fn statistics(&self) -> GraphStatistics {
        let num_unary_factors = self
            .factors
            .iter()
            .filter(|f| f.kind() == FactorKind::UnaryPrior)
            .count();
        GraphStatistics {
            num_nodes: self.nodes.len(),
            num_factors: self.factors.len(),
            num_unary_factors,
            num_binary_factors: self.factors.len() - num_unary_factors,
            state_dimension: self.state_dimension(),
            residual_dimension: self.factors.iter().map(|f| f.get_dimension()).sum(),
        }
    }

    /// Total cost `Σ rᵀΩr` at the current node states.
    pub fn chi2(&self) -> f64 {
        self.evaluate_chi2(&self.poses(), false)
    }

    /// Total cost at a candidate state, without touching the graph.
    ///
    /// `poses` must hold one pose per node, indexed by node id.
    pub fn chi2_at(&self, poses: &[G]) -> GraphResult<f64> {
        if poses.len() != self.nodes.len() {
            return Err(GraphError::StateLengthMismatch {
                expected: self.nodes.len(),
                actual: poses.len(),
            });
        }
        Ok(self.evaluate_chi2(poses, false))
    }

    /// Per-factor terms may be computed in parallel; they are always summed in
    /// factor order.
    pub(crate) fn evaluate_chi2(&self, poses: &[G], parallel: bool) -> f64 {
        let term = |factor: &dyn Factor<G>| factor.chi2(&factor_poses(factor, poses));
        let terms: Vec<f64> = if parallel {
            self.factors.par_iter().map(|f| term(f.as_ref())).collect()
        } else {
            self.factors.iter().map(|f| term(f.as_ref())).collect()
        };
        terms.into_iter().sum()
    }

    /// Linearize every factor at `poses` and assemble the block-sparse normal equations.
    pub(crate) fn linearize_at(
        &self,
        poses: &[G],
        parallel: bool,
    ) -> FGraphResult<BlockSparseSystem> {
        let linearize =
            |factor: &dyn Factor<G>| factor.linearize(&factor_poses(factor, poses), true);
        let linearized: Vec<(DVector<f64>, Option<DMatrix<f64>>)> = if parallel {
            self.factors.par_iter().map(|f| linearize(f.as_ref())).collect()
        } else {
            self.factors.iter().map(|f| linearize(f.as_ref())).collect()
        };

        let mut system = BlockSparseSystem::new(self.nodes.len(), G::DOF);
        for (factor, (residual, jacobian)) in self.factors.iter().zip(linearized) {
            if let Some(jacobian) = jacobian {
                system.add_factor(factor.node_ids(), &jacobian, factor.information(), &residual)?;
            }
        }
        debug!(
            "Assembled normal equations: {} unknowns, {} off-diagonal blocks",
            system.dimension(),
            system.off_diagonal_blocks()
        );
        Ok(system)
    }

    /// Replace all node states. Lengths are guaranteed by the optimizer.
    /// Symbolic Cholesky analyses run by all solves of this graph so far.
    pub fn symbolic_analyses(&self) -> usize {
        self.linear_solver.symbolic_analyses()
    }

    /// Lend the cached solver to an optimizer for the duration of one solve.
    pub(crate) fn take_linear_solver(&mut self) -> SparseCholeskySolver {
        std::mem::take(&mut self.linear_solver)
    }

    pub(crate) fn restore_linear_solver(&mut self, solver: SparseCholeskySolver) {
        self.linear_solver = solver;
    }

    pub(crate) fn set_poses(&mut self, poses: Vec<G>) {
        for (node, pose) in self.nodes.iter_mut().zip(poses) {
            node.pose = pose;
        }
    }

    /// Optimize all node states with default settings for everything but the
    /// method and iteration budget.
    pub fn solve(
        &mut self,
        optimizer_type: OptimizerType,
        max_iterations: usize,
    ) -> FGraphResult<SolveOutcome> {
        let config = SolverConfig::new()
            .with_optimizer_type(optimizer_type)
            .with_max_iterations(max_iterations);
        self.solve_with_config(&config)
    }

    pub fn solve_with_config(&mut self, config: &SolverConfig) -> FGraphResult<SolveOutcome> {
        crate::optimizer::optimize(self, config)
    }
}

/// Current states of the nodes a factor references, in factor order.
fn factor_poses<'a, G: LieGroup>(factor: &dyn Factor<G>, poses: &'a [G]) -> Vec<&'a G> {
    factor.node_ids().iter().map(|&id| &poses[id]).collect()
}

/// Check that `information` is a finite, symmetric, positive-semidefinite `dim x dim` matrix.
pub fn validate_information(information: &DMatrix<f64>, dim: usize) -> GraphResult<()> {
    if information.shape() != (dim, dim) {
        return Err(GraphError::InformationDimensionMismatch {
            expected: dim,
            actual_rows: information.nrows(),
            actual_cols: information.ncols(),
        });
    }
    if information.iter().any(|v| !v.is_finite()) {
        return Err(GraphError::InvalidInformation(
            "contains non-finite entries".to_string(),
        ));
    }

    let scale = information.amax().max(1.0);
    let asymmetry = (information - information.transpose()).amax();
    if asymmetry > INFORMATION_TOLERANCE * scale {
        return Err(GraphError::InvalidInformation(format!(
            "not symmetric (max asymmetry {asymmetry:.3e})"
        )));
    }

    let min_eigenvalue = information.clone().symmetric_eigen().eigenvalues.min();
    if min_eigenvalue < -INFORMATION_TOLERANCE * scale {
        return Err(GraphError::InvalidInformation(format!(
            "not positive semidefinite (min eigenvalue {min_eigenvalue:.3e})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{SE2, SE3};

    fn identity_info(dim: usize) -> DMatrix<f64> {
        DMatrix::identity(dim, dim)
    }

    #[test]
    fn test_add_node_assigns_sequential_ids() {
        let mut graph = FactorGraph::<SE2>::new();
        assert_eq!(graph.add_node(SE2::identity()), 0);
        assert_eq!(graph.add_node(SE2::from_xy_angle(1.0, 0.0, 0.0)), 1);
        assert_eq!(graph.node(1).map(|n| n.id()), Some(1));
        assert_eq!(graph.node(1).map(|n| n.dimension()), Some(3));
        assert_eq!(graph.state_dimension(), 6);
    }

    #[test]
    fn test_add_node_with_id_rejects_out_of_order() {
        let mut graph = FactorGraph::<SE2>::new();
        assert_eq!(graph.add_node_with_id(0, SE2::identity()), Ok(0));
        assert_eq!(
            graph.add_node_with_id(2, SE2::identity()),
            Err(GraphError::OutOfOrderNode {
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(
            graph.add_node_with_id(0, SE2::identity()),
            Err(GraphError::OutOfOrderNode {
                expected: 1,
                actual: 0
            })
        );
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_unknown_node_leaves_graph_unchanged() {
        let mut graph = FactorGraph::<SE3>::new();
        graph.add_node(SE3::identity());
        let before = graph.poses();

        let result = graph.add_binary_factor(SE3::identity(), 0, 5, identity_info(6));
        assert_eq!(
            result,
            Err(GraphError::UnknownNode {
                id: 5,
                node_count: 1
            })
        );
        let result = graph.add_odometry_factor(SE3::identity(), 0, 1, identity_info(6));
        assert!(matches!(result, Err(GraphError::UnknownNode { id: 1, .. })));
        let result = graph.add_unary_factor(SE3::identity(), 3, identity_info(6));
        assert!(matches!(result, Err(GraphError::UnknownNode { id: 3, .. })));

        assert_eq!(graph.factor_count(), 0);
        assert_eq!(graph.poses(), before);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = FactorGraph::<SE2>::new();
        graph.add_node(SE2::identity());
        let result = graph.add_binary_factor(SE2::identity(), 0, 0, identity_info(3));
        assert_eq!(result, Err(GraphError::SelfLoop { id: 0 }));
    }

    #[test]
    fn test_information_validation() {
        assert!(validate_information(&identity_info(3), 3).is_ok());
        assert!(validate_information(&DMatrix::zeros(3, 3), 3).is_ok());
        assert!(matches!(
            validate_information(&identity_info(6), 3),
            Err(GraphError::InformationDimensionMismatch { expected: 3, .. })
        ));

        let mut asymmetric = identity_info(3);
        asymmetric[(0, 1)] = 0.5;
        assert!(matches!(
            validate_information(&asymmetric, 3),
            Err(GraphError::InvalidInformation(_))
        ));

        let mut indefinite = identity_info(3);
        indefinite[(2, 2)] = -1.0;
        assert!(matches!(
            validate_information(&indefinite, 3),
            Err(GraphError::InvalidInformation(_))
        ));

        let mut non_finite = identity_info(3);
        non_finite[(1, 1)] = f64::NAN;
        assert!(matches!(
            validate_information(&non_finite, 3),
            Err(GraphError::InvalidInformation(_))
        ));
    }

    #[test]
    fn test_non_psd_information_rejected_at_add_time() {
        let mut graph = FactorGraph::<SE2>::new();
        graph.add_node(SE2::identity());
        graph.add_node(SE2::identity());
        let info = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let result = graph.add_binary_factor(SE2::identity(), 0, 1, info);
        assert!(matches!(result, Err(GraphError::InvalidInformation(_))));
        assert_eq!(graph.factor_count(), 0);
    }

    #[test]
    fn test_chi2_is_read_only_and_weighted() {
        let mut graph = FactorGraph::<SE2>::new();
        let a = graph.add_node(SE2::identity());
        let b = graph.add_node(SE2::from_xy_angle(1.0, 0.0, 0.0));
        graph
            .add_binary_factor(SE2::from_xy_angle(2.0, 0.0, 0.0), a, b, identity_info(3) * 2.0)
            .unwrap();
        let before = graph.poses();
        // r = [-1, 0, 0], chi2 = 2
        assert!((graph.chi2() - 2.0).abs() < 1e-12);
        assert_eq!(graph.chi2_at(&before), Ok(graph.chi2()));
        assert!(matches!(
            graph.chi2_at(&before[..1]),
            Err(GraphError::StateLengthMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(graph.poses(), before);
    }

    #[test]
    fn test_odometry_factor_initializes_target() {
        let mut graph = FactorGraph::<SE2>::new();
        let a = graph.add_node(SE2::from_xy_angle(1.0, 1.0, std::f64::consts::FRAC_PI_2));
        let b = graph.add_node(SE2::identity());
        graph
            .add_odometry_factor(SE2::from_xy_angle(2.0, 0.0, 0.0), a, b, identity_info(3))
            .unwrap();
        let Some(pose) = graph.pose(b) else {
            panic!("node exists");
        };
        assert!((pose.x() - 1.0).abs() < 1e-12);
        assert!((pose.y() - 3.0).abs() < 1e-12);
        assert!(graph.chi2() < 1e-20);
    }

    #[test]
    fn test_parallel_and_sequential_chi2_agree() {
        let mut graph = FactorGraph::<SE3>::new();
        for i in 0..20 {
            graph.add_node(SE3::from_translation_euler(i as f64, 0.1 * i as f64, 0.0, 0.0, 0.0, 0.05 * i as f64));
        }
        for i in 1..20 {
            graph
                .add_binary_factor(SE3::from_translation_euler(1.0, 0.0, 0.0, 0.0, 0.0, 0.0), i - 1, i, identity_info(6))
                .unwrap();
        }
        let poses = graph.poses();
        assert_eq!(graph.evaluate_chi2(&poses, true), graph.evaluate_chi2(&poses, false));
    }

    #[test]
    fn test_resolve_reuses_symbolic_analysis_until_graph_grows() {
        let mut graph = FactorGraph::<SE2>::new();
        for i in 0..5 {
            graph.add_node(SE2::from_xy_angle(i as f64 * 1.1, 0.05 * i as f64, 0.02));
        }
        graph.add_unary_factor(SE2::identity(), 0, identity_info(3) * 1e4).unwrap();
        let step = SE2::from_xy_angle(1.0, 0.0, 0.0);
        for i in 1..5 {
            graph.add_binary_factor(step.clone(), i - 1, i, identity_info(3)).unwrap();
        }
        assert_eq!(graph.symbolic_analyses(), 0);

        let first = graph.solve(OptimizerType::LevenbergMarquardt, 50).unwrap();
        assert!(first.final_chi2 < 1e-10);
        assert_eq!(graph.symbolic_analyses(), 1);
        graph.solve(OptimizerType::GaussNewton, 50).unwrap();
        assert_eq!(graph.symbolic_analyses(), 1);

        // New keyframe with a poor initial guess; the other poses start from the last solution.
        let new = graph.add_node(SE2::from_xy_angle(4.3, 0.4, -0.1));
        graph.add_binary_factor(step.clone(), new - 1, new, identity_info(3)).unwrap();
        let resumed = graph.solve(OptimizerType::LevenbergMarquardt, 50).unwrap();
        assert!(resumed.final_chi2 < 1e-10);
        assert_eq!(graph.symbolic_analyses(), 2);
        let Some(pose) = graph.pose(new) else {
            panic!("node exists");
        };
        assert!((pose.x() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_statistics() {
        let mut graph = FactorGraph::<SE2>::new();
        graph.add_node(SE2::identity());
        graph.add_node(SE2::identity());
        graph.add_unary_factor(SE2::identity(), 0, identity_info(3)).unwrap();
        graph.add_binary_factor(SE2::identity(), 0, 1, identity_info(3)).unwrap();
        let stats = graph.statistics();
        assert_eq!(stats.num_nodes, 2);
        assert_eq!(stats.num_unary_factors, 1);
        assert_eq!(stats.num_binary_factors, 1);
        assert_eq!(stats.residual_dimension, 6);
        assert!(stats.to_string().contains("Nodes: 2"));
    }
}
