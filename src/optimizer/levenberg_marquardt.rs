//! Levenberg-Marquardt optimizer.
//!
//! Solves the damped normal equations `(H + λI) Δ = -g`. A step is accepted
//! only if it lowers chi2, so the committed cost never increases:
//! - accepted: `λ ← max(λ · decrease, λ_min)`, relinearize
//! - rejected: `λ ← min(λ · increase, λ_max)`, retry on the same linearization
//!
//! A factorization failure is treated like a rejected step. Once the retry
//! budget of one linearization is spent the solve stops, reporting
//! [`OptimizationStatus::Converged`] if the quadratic model predicted no
//! meaningful decrease and [`OptimizationStatus::Diverged`] otherwise.

use super::{ConvergenceInfo, OptimizationStatus, SolveOutcome, SolverConfig};
use super::{relative_decrease, retract};
use crate::core::FactorGraph;
use crate::error::FGraphResult;
use crate::linalg::{BlockSparseSystem, LinAlgResult, SparseCholeskySolver};
use crate::manifold::LieGroup;
use nalgebra::DVector;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where the solve loop is.
enum Phase {
    Linearize,
    /// Try a damped step; `retries` counts failures already seen on this linearization.
    Step {
        system: BlockSparseSystem,
        retries: usize,
    },
    Done(OptimizationStatus),
}

#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: SolverConfig,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn increase_damping(&self, damping: f64) -> f64 {
        (damping * self.config.damping_increase_factor).min(self.config.damping_max)
    }

    fn decrease_damping(&self, damping: f64) -> f64 {
        (damping * self.config.damping_decrease_factor).max(self.config.damping_min)
    }

    /// `(H + λI) Δ = -g`
    fn compute_step(
        solver: &mut SparseCholeskySolver,
        system: &BlockSparseSystem,
        damping: f64,
    ) -> LinAlgResult<DVector<f64>> {
        let matrix = system.to_sparse(damping)?;
        solver.solve(&matrix, &-system.gradient())
    }

    /// Decrease of chi2 predicted by the local quadratic model `c + 2gᵀΔ + ΔᵀHΔ`.
    fn predicted_reduction(system: &BlockSparseSystem, step: &DVector<f64>) -> f64 {
        -2.0 * system.gradient().dot(step) - system.quadratic_form(step)
    }

    /// Run Levenberg-Marquardt on `graph` and commit the best state reached.
    pub fn optimize<G: LieGroup>(&self, graph: &mut FactorGraph<G>) -> FGraphResult<SolveOutcome> {
        let start_time = Instant::now();
        let config = &self.config;
        let mut linear_solver = graph.take_linear_solver();
        let mut poses = graph.poses();
        let initial_chi2 = graph.evaluate_chi2(&poses, config.parallel);
        let mut current_chi2 = initial_chi2;
        let mut damping = config.initial_damping;
        let mut iterations = 0;
        let mut convergence = ConvergenceInfo::default();

        info!(
            "Starting Levenberg-Marquardt: {} nodes, {} factors, initial chi2 = {:.6e}, initial damping = {:.3e}",
            graph.node_count(),
            graph.factor_count(),
            initial_chi2,
            damping
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
                        Phase::Step { system, retries: 0 }
                    }
                }
                Phase::Step { system, retries } => {
                    match Self::compute_step(&mut linear_solver, &system, damping) {
                        Err(e) => {
                            convergence.rejected_steps += 1;
                            warn!(
                                "Iteration {}: linear solve failed at damping {:.3e}: {}",
                                iterations, damping, e
                            );
                            let saturated = damping >= config.damping_max;
                            damping = self.increase_damping(damping);
                            if retries + 1 >= config.max_rejected_steps || saturated {
                                Phase::Done(OptimizationStatus::NumericalFailure)
                            } else {
                                Phase::Step {
                                    system,
                                    retries: retries + 1,
                                }
                            }
                        }
                        Ok(step) => {
                            let step_norm = step.norm();
                            convergence.final_step_norm = step_norm;
                            let trial = retract(&poses, &step)?;
                            let trial_chi2 = graph.evaluate_chi2(&trial, config.parallel);
                            let predicted = Self::predicted_reduction(&system, &step);

                            if trial_chi2.is_finite() && trial_chi2 < current_chi2 {
                                let decrease = relative_decrease(current_chi2, trial_chi2);
                                let rho = if predicted > 0.0 {
                                    (current_chi2 - trial_chi2) / predicted
                                } else {
                                    0.0
                                };
                                convergence.accepted_steps += 1;
                                debug!(
                                    "Iteration {}: chi2 = {:.6e}, reduction = {:.6e}, damping = {:.3e}, step_norm = {:.3e}, rho = {:.3} [ACCEPTED]",
                                    iterations,
                                    trial_chi2,
                                    current_chi2 - trial_chi2,
                                    damping,
                                    step_norm,
                                    rho
                                );
                                poses = trial;
                                current_chi2 = trial_chi2;
                                damping = self.decrease_damping(damping);
                                if decrease <= config.cost_tolerance
                                    || step_norm <= config.parameter_tolerance
                                {
                                    Phase::Done(OptimizationStatus::Converged)
                                } else {
                                    Phase::Linearize
                                }
                            } else if step_norm <= config.parameter_tolerance {
                                Phase::Done(OptimizationStatus::Converged)
                            } else {
                                convergence.rejected_steps += 1;
                                debug!(
                                    "Iteration {}: chi2 = {:.6e}, damping = {:.3e}, step_norm = {:.3e} [REJECTED]",
                                    iterations, trial_chi2, damping, step_norm
                                );
                                let saturated = damping >= config.damping_max;
                                damping = self.increase_damping(damping);
                                if retries + 1 < config.max_rejected_steps && !saturated {
                                    Phase::Step {
                                        system,
                                        retries: retries + 1,
                                    }
                                } else if predicted <= config.cost_tolerance * current_chi2 {
                                    Phase::Done(OptimizationStatus::Converged)
                                } else {
                                    warn!(
                                        "Levenberg-Marquardt stalled at iteration {} with damping {:.3e}",
                                        iterations, damping
                                    );
                                    Phase::Done(OptimizationStatus::Diverged)
                                }
                            }
                        }
                    }
                }
            };
        };

        convergence.final_damping = damping;
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
            "Levenberg-Marquardt finished: {} after {} iterations, chi2 {:.6e} -> {:.6e}",
            outcome.status, outcome.iterations_used, outcome.initial_chi2, outcome.final_chi2
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{SE2, SE3, Tangent};
    use nalgebra::DMatrix;

    fn perturbed_loop() -> FactorGraph<SE2> {
        let mut graph = FactorGraph::new();
        let ids: Vec<_> = [
            (0.0, 0.0, 0.0),
            (1.2, 0.1, 1.4),
            (0.9, 1.3, 3.0),
            (-0.2, 0.8, -1.7),
        ]
        .iter()
        .map(|&(x, y, t)| graph.add_node(SE2::from_xy_angle(x, y, t)))
        .collect();
        let info = DMatrix::identity(3, 3);
        graph
            .add_unary_factor(SE2::identity(), ids[0], info.clone() * 1e4)
            .unwrap();
        let side = SE2::from_xy_angle(1.0, 0.0, std::f64::consts::FRAC_PI_2);
        for i in 0..4 {
            graph
                .add_binary_factor(side.clone(), ids[i], ids[(i + 1) % 4], info.clone())
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_lm_solves_square_loop() {
        let mut graph = perturbed_loop();
        let outcome = LevenbergMarquardt::new().optimize(&mut graph).unwrap();
        assert_eq!(outcome.status, OptimizationStatus::Converged);
        assert!(outcome.final_chi2 < 1e-8);
        let corner = graph.pose(2).unwrap();
        assert!((corner.x() - 1.0).abs() < 1e-4);
        assert!((corner.y() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_lm_never_increases_chi2() {
        for max_iterations in 1..6 {
            let mut graph = perturbed_loop();
            let optimizer = LevenbergMarquardt::with_config(
                SolverConfig::new().with_max_iterations(max_iterations),
            );
            let outcome = optimizer.optimize(&mut graph).unwrap();
            assert!(outcome.final_chi2 <= outcome.initial_chi2);
            assert!(outcome.iterations_used <= max_iterations);
            assert!((graph.chi2() - outcome.final_chi2).abs() <= 1e-9 * outcome.initial_chi2);
        }
    }

    #[test]
    fn test_lm_budget_exhaustion_keeps_best_state() {
        let mut graph = perturbed_loop();
        let optimizer =
            LevenbergMarquardt::with_config(SolverConfig::new().with_max_iterations(1));
        let outcome = optimizer.optimize(&mut graph).unwrap();
        assert_eq!(outcome.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(outcome.iterations_used, 1);
        assert!(outcome.convergence_info.accepted_steps >= 1);
        assert!(outcome.final_chi2 < outcome.initial_chi2);
        assert!((graph.chi2() - outcome.final_chi2).abs() <= 1e-12 * outcome.initial_chi2);
    }

    #[test]
    fn test_lm_handles_unconstrained_node_through_damping() {
        let mut graph = FactorGraph::new();
        let a = graph.add_node(SE2::from_xy_angle(0.5, 0.0, 0.0));
        graph.add_node(SE2::from_xy_angle(3.0, 0.0, 0.0));
        graph
            .add_unary_factor(SE2::identity(), a, DMatrix::identity(3, 3))
            .unwrap();
        let outcome = LevenbergMarquardt::new().optimize(&mut graph).unwrap();
        assert_eq!(outcome.status, OptimizationStatus::Converged);
        assert!(outcome.final_chi2 < 1e-8);
        assert!((graph.pose(1).unwrap().x() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lm_se3_chain() {
        let mut graph = FactorGraph::new();
        let a = graph.add_node(SE3::identity());
        let b = graph.add_node(SE3::from_translation_euler(0.8, 0.2, -0.1, 0.1, -0.05, 0.3));
        let info = DMatrix::identity(6, 6);
        graph
            .add_unary_factor(SE3::identity(), a, info.clone() * 1e4)
            .unwrap();
        let odom = SE3::from_translation_euler(1.0, 0.0, 0.0, 0.0, 0.0, 0.2);
        graph.add_binary_factor(odom.clone(), a, b, info).unwrap();

        let outcome = LevenbergMarquardt::new().optimize(&mut graph).unwrap();
        assert_eq!(outcome.status, OptimizationStatus::Converged);
        let error = graph.pose(b).unwrap().right_minus(&odom, None, None);
        assert!(error.norm() < 1e-5);
    }

    #[test]
    fn test_damping_schedule_is_clamped() {
        let lm = LevenbergMarquardt::with_config(
            SolverConfig::new().with_damping_bounds(1e-3, 1e3),
        );
        assert_eq!(lm.increase_damping(500.0), 1e3);
        assert_eq!(lm.decrease_damping(5e-3), 1e-3);
    }
}
