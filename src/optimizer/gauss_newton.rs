//! Gauss-Newton optimizer.
//!
//! Solves `H Δ = -g` at every linearization and always takes the full step.
//! Converges quadratically near the minimum of an anchored graph. A step that
//! increases chi2 ends the solve with [`OptimizationStatus::Diverged`] and the
//! last good state is kept.

use super::{ConvergenceInfo, OptimizationStatus, SolveOutcome, SolverConfig};
use super::{relative_decrease, retract};
use crate::core::FactorGraph;
use crate::error::FGraphResult;
use crate::linalg::BlockSparseSystem;
use crate::manifold::LieGroup;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the solve loop is.
enum Phase {
    Linearize,
    Step(BlockSparseSystem),
    Done(OptimizationStatus),
}

#[derive(Debug, Clone, Default)]
pub struct GaussNewton {
    config: SolverConfig,
}

impl GaussNewton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Run Gauss-Newton on `graph` and commit the best state reached.
    pub fn optimize<G: LieGroup>(&self, graph: &mut FactorGraph<G>) -> FGraphResult<SolveOutcome> {
        let start_time = Instant::now();
        let config = &self.config;
        let mut linear_solver = graph.take_linear_solver();
        let mut poses = graph.poses();
        let initial_chi2 = graph.evaluate_chi2(&poses, config.parallel);
        let mut current_chi2 = initial_chi2;
        let mut iterations = 0;
        let mut convergence = ConvergenceInfo::default();

        info!(
            "Starting Gauss-Newton: {} nodes, {} factors, initial chi2 = {:.6e}",
            graph.node_count(),
            graph.factor_count(),
            initial_chi2
        );

        let mut phase = if graph.node_count() == 0 {
            Phase::Done(OptimizationStatus::Converged)
        } else if !initial_chi2.is_finite() {
            Phase::Done(OptimizationStatus::NumericalFailure)
        } else {
            Phase::Linearize
        };

        let status = loop {
            phase = match phase {
                Phase::Done(status) => break status,
                Phase::Linearize if iterations >= config.max_iterations => {
                    Phase::Done(OptimizationStatus::MaxIterationsReached)
                }
                Phase::Linearize => {
                    iterations += 1;
                    let system = graph.linearize_at(&poses, config.parallel)?;
                    convergence.final_gradient_norm = system.gradient().amax();
                    if current_chi2 == 0.0
                        || convergence.final_gradient_norm <= config.gradient_tolerance
                    {
                        Phase::Done(OptimizationStatus::Converged)
                    } else {
                        Phase::Step(system)
                    }
                }
                Phase::Step(system) => {
                    let step = match system
                        .to_sparse(0.0)
                        .and_then(|h| linear_solver.solve(&h, &-system.gradient()))
                    {
                        Ok(step) => step,
                        Err(e) => {
                            warn!("Gauss-Newton iteration {}: {}", iterations, e);
                            break OptimizationStatus::NumericalFailure;
                        }
                    };
                    let step_norm = step.norm();
                    convergence.final_step_norm = step_norm;

                    let trial = retract(&poses, &step)?;
                    let trial_chi2 = graph.evaluate_chi2(&trial, config.parallel);

                    if !trial_chi2.is_finite() {
                        warn!("Gauss-Newton iteration {}: non-finite chi2", iterations);
                        convergence.rejected_steps += 1;
                        Phase::Done(OptimizationStatus::NumericalFailure)
                    } else if trial_chi2 >= current_chi2 {
                        convergence.rejected_steps += 1;
                        let increase = (trial_chi2 - current_chi2) / current_chi2;
                        debug!(
                            "Iteration {}: chi2 = {:.6e}, step_norm = {:.3e} [REJECTED]",
                            iterations, trial_chi2, step_norm
                        );
                        if increase <= config.cost_tolerance
                            || step_norm <= config.parameter_tolerance
                        {
                            Phase::Done(OptimizationStatus::Converged)
                        } else {
                            warn!(
                                "Gauss-Newton diverged at iteration {}: chi2 {:.6e} -> {:.6e}",
                                iterations, current_chi2, trial_chi2
                            );
                            Phase::Done(OptimizationStatus::Diverged)
                        }
                    } else {
                        let decrease = relative_decrease(current_chi2, trial_chi2);
                        convergence.accepted_steps += 1;
                        debug!(
                            "Iteration {}: chi2 = {:.6e}, reduction = {:.6e}, step_norm = {:.3e} [ACCEPTED]",
                            iterations,
                            trial_chi2,
                            current_chi2 - trial_chi2,
                            step_norm
                        );
                        poses = trial;
                        current_chi2 = trial_chi2;
                        if decrease <= config.cost_tolerance
                            || step_norm <= config.parameter_tolerance
                        {
                            Phase::Done(OptimizationStatus::Converged)
                        } else {
                            Phase::Linearize
                        }
                    }
                }
            };
        };

        graph.restore_linear_solver(linear_solver);
        graph.set_poses(poses);
        let outcome = SolveOutcome {
            status,
            initial_chi2,
            final_chi2: current_chi2,
            iterations_used: iterations,
            elapsed_time: start_time.elapsed(),
            convergence_info: convergence,
        };
        info!(
            "Gauss-Newton finished: {} after {} iterations, chi2 {:.6e} -> {:.6e}",
            outcome.status, outcome.iterations_used, outcome.initial_chi2, outcome.final_chi2
        );
        Ok(outcome)
    }
}
