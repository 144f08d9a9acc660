//! Core pose-graph components.
//!
//! - [`FactorGraph`]: owns nodes and factors, validates structure on insertion
//! - [`Node`]: a pose variable addressed by a dense [`NodeId`](crate::factors::NodeId)
//! - [`GraphError`]: structural errors reported before any mutation

pub mod graph;

pub use graph::{
    FactorGraph, FactorId, GraphError, GraphResult, GraphStatistics, Node, validate_information,
};
