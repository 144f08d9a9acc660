//! Nonlinear least-squares optimizers for pose graphs.
//!
//! - [`GaussNewton`]: undamped steps, fast on well-conditioned anchored graphs
//! - [`LevenbergMarquardt`]: damped steps with accept/reject, robust default
//!
//! Both work on a private copy of the node states and commit the best state
//! reached back to the graph when they return.

use crate::core::FactorGraph;
use crate::error::FGraphResult;
use crate::manifold::{LieGroup, Tangent};
use nalgebra::DVector;
use std::fmt;
use std::time::Duration;

pub mod gauss_newton;
pub mod levenberg_marquardt;

pub use gauss_newton::GaussNewton;
pub use levenberg_marquardt::LevenbergMarquardt;

/// Type of optimization algorithm to use
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerType {
    /// Levenberg-Marquardt algorithm (robust, adaptive damping)
    #[default]
    LevenbergMarquardt,
    /// Gauss-Newton algorithm (fast convergence, may be unstable)
    GaussNewton,
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
        }
    }
}

/// Solver configuration.
///
/// Defaults: relative chi2 tolerance 1e-6, increment norm tolerance 1e-8,
/// initial damping 1e-4 scaled ×10 on rejection and ÷10 on acceptance, at most
/// 10 consecutive rejected steps per linearization.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub optimizer_type: OptimizerType,
    /// Maximum number of linearizations
    pub max_iterations: usize,
    /// Stop when `(chi2_old - chi2_new) / chi2_old` drops below this
    pub cost_tolerance: f64,
    /// Stop when the increment norm drops below this
    pub parameter_tolerance: f64,
    /// Stop when the max-norm of the gradient `JᵀΩr` drops below this
    pub gradient_tolerance: f64,
    pub initial_damping: f64,
    pub damping_increase_factor: f64,
    pub damping_decrease_factor: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    /// Rejected (or unfactorizable) LM steps per linearization; the solve stops
    /// on the rejection that reaches this count. Zero behaves like one.
    pub max_rejected_steps: usize,
    /// Evaluate factors on the rayon thread pool
    pub parallel: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::default(),
            max_iterations: 50,
            cost_tolerance: 1e-6,
            parameter_tolerance: 1e-8,
            gradient_tolerance: 1e-10,
            initial_damping: 1e-4,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.1,
            damping_min: 1e-12,
            damping_max: 1e12,
            max_rejected_steps: 10,
            parallel: true,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimizer_type(mut self, optimizer_type: OptimizerType) -> Self {
        self.optimizer_type = optimizer_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.initial_damping = damping;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn with_max_rejected_steps(mut self, max_rejected_steps: usize) -> Self {
        self.max_rejected_steps = max_rejected_steps;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl fmt::Display for SolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SolverConfig {{ optimizer: {}, max_iterations: {}, cost_tolerance: {:.1e}, parameter_tolerance: {:.1e}, initial_damping: {:.1e}, parallel: {} }}",
            self.optimizer_type,
            self.max_iterations,
            self.cost_tolerance,
            self.parameter_tolerance,
            self.initial_damping,
            self.parallel
        )
    }
}

/// How a solve ended. None of these is an error: callers decide what is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// A cost, increment or gradient tolerance was met
    Converged,
    /// The iteration budget ran out before convergence
    MaxIterationsReached,
    /// Steps kept increasing the cost; the best state seen was kept
    Diverged,
    /// The linear system could not be factorized or produced non-finite values
    NumericalFailure,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::Diverged => write!(f, "Diverged"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
        }
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceInfo {
    pub final_step_norm: f64,
    pub final_gradient_norm: f64,
    /// Damping in effect when the solve ended (0 for Gauss-Newton)
    pub final_damping: f64,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final step norm: {:.2e}, final gradient norm: {:.2e}, final damping: {:.2e}, accepted: {}, rejected: {}",
            self.final_step_norm,
            self.final_gradient_norm,
            self.final_damping,
            self.accepted_steps,
            self.rejected_steps
        )
    }
}

/// Result of [`FactorGraph::solve`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: OptimizationStatus,
    pub initial_chi2: f64,
    pub final_chi2: f64,
    /// Number of linearizations performed, never more than `max_iterations`
    pub iterations_used: usize,
    pub elapsed_time: Duration,
    pub convergence_info: ConvergenceInfo,
}

impl fmt::Display for SolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status:           {}", self.status)?;
        writeln!(f, "Initial chi2:     {:.6e}", self.initial_chi2)?;
        writeln!(f, "Final chi2:       {:.6e}", self.final_chi2)?;
        writeln!(f, "Iterations:       {}", self.iterations_used)?;
        writeln!(f, "Elapsed:          {:?}", self.elapsed_time)?;
        write!(f, "{}", self.convergence_info)
    }
}

/// Run the optimizer selected in `config` and commit the best state to `graph`.
pub(crate) fn optimize<G: LieGroup>(
    graph: &mut FactorGraph<G>,
    config: &SolverConfig,
) -> FGraphResult<SolveOutcome> {
    match config.optimizer_type {
        OptimizerType::GaussNewton => GaussNewton::with_config(config.clone()).optimize(graph),
        OptimizerType::LevenbergMarquardt => {
            LevenbergMarquardt::with_config(config.clone()).optimize(graph)
        }
    }
}

/// Apply a stacked increment to every node: `Xᵢ ← Xᵢ ⊞ Δᵢ`.
pub(crate) fn retract<G: LieGroup>(poses: &[G], step: &DVector<f64>) -> FGraphResult<Vec<G>> {
    let dof = G::DOF;
    let values = step.as_slice();
    poses
        .iter()
        .enumerate()
        .map(|(i, pose)| {
            let delta = G::TangentVector::from_slice(&values[i * dof..(i + 1) * dof])?;
            Ok(pose.right_plus(&delta, None, None))
        })
        .collect()
}

/// `(old - new) / old`, treating a zero old cost as no possible decrease.
pub(crate) fn relative_decrease(old: f64, new: f64) -> f64 {
    if old > 0.0 { (old - new) / old } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::SE2;

    #[test]
    fn test_config_builder() {
        let config = SolverConfig::new()
            .with_optimizer_type(OptimizerType::GaussNewton)
            .with_max_iterations(7)
            .with_damping(1e-2)
            .with_damping_factors(4.0, 0.25)
            .with_parallel(false);
        assert_eq!(config.optimizer_type, OptimizerType::GaussNewton);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.initial_damping, 1e-2);
        assert_eq!(config.damping_increase_factor, 4.0);
        assert_eq!(config.damping_decrease_factor, 0.25);
        assert!(!config.parallel);
        assert_eq!(config.cost_tolerance, 1e-6);
    }

    #[test]
    fn test_retract_applies_per_node_blocks() {
        let poses = vec![SE2::identity(), SE2::from_xy_angle(1.0, 0.0, 0.0)];
        let step = DVector::from_vec(vec![0.5, 0.0, 0.0, 0.0, 0.0, 0.1]);
        let Ok(updated) = retract(&poses, &step) else {
            panic!("finite step");
        };
        assert!((updated[0].x() - 0.5).abs() < 1e-12);
        assert!((updated[1].angle() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_retract_rejects_non_finite_step() {
        let poses = vec![SE2::identity()];
        let step = DVector::from_vec(vec![f64::NAN, 0.0, 0.0]);
        assert!(retract(&poses, &step).is_err());
    }

    #[test]
    fn test_relative_decrease() {
        assert!((relative_decrease(10.0, 9.0) - 0.1).abs() < 1e-12);
        assert_eq!(relative_decrease(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(OptimizationStatus::Diverged.to_string(), "Diverged");
        assert_eq!(OptimizerType::GaussNewton.to_string(), "Gauss-Newton");
    }
}
