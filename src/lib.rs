//! # fgraph-solver
//!
//! Pose-graph optimization on SE(2) and SE(3).
//!
//! A [`FactorGraph`] holds pose nodes and prior/between factors with full
//! information matrices. It is solved with Gauss-Newton or
//! Levenberg-Marquardt over a sparse Cholesky factorization, with every update
//! applied on the manifold. The [`registration`] module recovers a rigid
//! transform between corresponding 3D point sets.
//!
//! ```
//! use fgraph_solver::{FactorGraph, OptimizerType, SE2, LieGroup};
//! use nalgebra::DMatrix;
//!
//! let mut graph = FactorGraph::new();
//! let a = graph.add_node(SE2::identity());
//! let b = graph.add_node(SE2::from_xy_angle(0.9, 0.1, 0.05));
//! let info = DMatrix::identity(3, 3);
//! graph.add_unary_factor(SE2::identity(), a, info.clone() * 1e6).unwrap();
//! graph.add_binary_factor(SE2::from_xy_angle(1.0, 0.0, 0.0), a, b, info).unwrap();
//!
//! let outcome = graph.solve(OptimizerType::LevenbergMarquardt, 20).unwrap();
//! assert!(outcome.final_chi2 < outcome.initial_chi2);
//! ```

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod registration;

pub use crate::core::{FactorGraph, GraphError, GraphStatistics, Node};
pub use error::{FGraphError, FGraphResult};
pub use factors::{BetweenFactor, Factor, FactorKind, NodeId, PriorFactor};
pub use logger::{init_logger, init_logger_with_level};
pub use manifold::{LieGroup, SE2, SE3, Tangent};
pub use optimizer::{
    ConvergenceInfo, OptimizationStatus, OptimizerType, SolveOutcome, SolverConfig,
};
pub use registration::{Alignment, RegistrationError};
