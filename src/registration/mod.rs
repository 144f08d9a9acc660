//! Closed-form rigid registration of corresponding 3D point sets.
//!
//! Given source points `xᵢ` and target points `yᵢ` with `yᵢ ≈ R xᵢ + t`, find
//! the transform `T = (R, t)` minimizing `Σ wᵢ ‖yᵢ - T xᵢ‖²`. The rotation comes
//! from the SVD of the (weighted) cross-covariance of the centered sets
//! (Arun's method), with a determinant correction so the result is never a
//! reflection.
//!
//! - [`align`] / [`align_with_error`]: every correspondence weighted equally
//! - [`align_weighted`] / [`align_weighted_with_error`]: per-point weights

use crate::manifold::{LieGroup, SE3, SO3};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use thiserror::Error;

pub mod arun;
pub mod weighted;

pub use arun::{align, align_with_error};
pub use weighted::{align_weighted, align_weighted_with_error};

/// Minimum number of correspondences that determine a rigid transform.
pub const MIN_POINTS: usize = 3;

/// Ratio `σ₂ / σ₁` of the cross-covariance below which the input is degenerate.
const DEGENERACY_RATIO: f64 = 1e-10;

/// The source set's second principal extent must exceed the alignment
/// residual by this factor, otherwise the rotation about the principal axis
/// is lost in the noise.
const MIN_EXTENT_TO_RESIDUAL: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("Point set lengths differ: {source_len} source vs {target_len} target")]
    LengthMismatch { source_len: usize, target_len: usize },

    #[error("At least 3 correspondences are required, got {actual}")]
    TooFewPoints { actual: usize },

    #[error("Non-finite coordinate in {set} point {index}")]
    NonFinitePoint { set: &'static str, index: usize },

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    /// Coincident or collinear points leave the rotation undetermined
    #[error("Degenerate point configuration: {0}")]
    DegenerateInput(String),

    #[error("SVD of the cross-covariance failed")]
    SvdFailed,
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// A recovered transform with its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Maps source points onto target points
    pub transform: SE3,
    /// Root-mean-square distance `‖yᵢ - T xᵢ‖` after alignment (weighted if weights were given)
    pub residual_error: f64,
    /// `σ₂ / σ₁` of the cross-covariance; values near zero mean nearly collinear input
    pub condition_ratio: f64,
}

/// RMS alignment error of `transform` over the correspondences.
///
/// With `weights`, this is `sqrt(Σ wᵢ ‖yᵢ - T xᵢ‖² / Σ wᵢ)`.
pub fn alignment_error(
    transform: &SE3,
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
    weights: Option<&[f64]>,
) -> RegistrationResult<f64> {
    check_correspondences(source, target)?;
    if let Some(weights) = weights {
        check_weights(weights, source.len())?;
    }
    let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

    let (weighted_sum, total_weight) = source.iter().zip(target).enumerate().fold(
        (0.0, 0.0),
        |(sum, total), (i, (x, y))| {
            let w = weight(i);
            (sum + w * (y - transform.act(x)).norm_squared(), total + w)
        },
    );
    Ok((weighted_sum / total_weight).sqrt())
}

fn check_correspondences(source: &[Vector3<f64>], target: &[Vector3<f64>]) -> RegistrationResult<()> {
    if source.len() != target.len() {
        return Err(RegistrationError::LengthMismatch {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    if source.len() < MIN_POINTS {
        return Err(RegistrationError::TooFewPoints {
            actual: source.len(),
        });
    }
    for (set, points) in [("source", source), ("target", target)] {
        if let Some(index) = points.iter().position(|p| !p.iter().all(|v| v.is_finite())) {
            return Err(RegistrationError::NonFinitePoint { set, index });
        }
    }
    Ok(())
}

fn check_weights(weights: &[f64], expected: usize) -> RegistrationResult<()> {
    if weights.len() != expected {
        return Err(RegistrationError::InvalidWeights(format!(
            "expected {} weights, got {}",
            expected,
            weights.len()
        )));
    }
    if let Some(index) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
        return Err(RegistrationError::InvalidWeights(format!(
            "weight {} is {}",
            index, weights[index]
        )));
    }
    let positive = weights.iter().filter(|&&w| w > 0.0).count();
    if positive < MIN_POINTS {
        return Err(RegistrationError::InvalidWeights(format!(
            "only {positive} weights are positive, at least {MIN_POINTS} are required"
        )));
    }
    Ok(())
}

fn weighted_centroid(points: &[Vector3<f64>], weights: &[f64], total: f64) -> Vector3<f64> {
    points
        .iter()
        .zip(weights)
        .fold(Vector3::zeros(), |acc, (p, &w)| acc + p * w)
        / total
}

/// Shared solver: weights have already been validated and are all ones for Arun.
fn solve_rigid(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
    weights: &[f64],
) -> RegistrationResult<Alignment> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(RegistrationError::InvalidWeights(format!(
            "weight sum is {total}"
        )));
    }
    let source_centroid = weighted_centroid(source, weights, total);
    let target_centroid = weighted_centroid(target, weights, total);

    let mut h = Matrix3::zeros();
    let mut scatter = Matrix3::zeros();
    for ((x, y), &w) in source.iter().zip(target).zip(weights) {
        let dx = x - source_centroid;
        h += dx * (y - target_centroid).transpose() * w;
        scatter += dx * dx.transpose() * w;
    }

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(RegistrationError::SvdFailed);
    };
    let sigma = svd.singular_values;
    let mut sorted = [sigma[0], sigma[1], sigma[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if sorted[0] <= 0.0 || sorted[1] <= DEGENERACY_RATIO * sorted[0] {
        return Err(RegistrationError::DegenerateInput(format!(
            "cross-covariance singular values {:.3e}, {:.3e}, {:.3e}",
            sorted[0], sorted[1], sorted[2]
        )));
    }

    let v = v_t.transpose();
    let u_t = u.transpose();
    let mut correction = Vector3::new(1.0, 1.0, 1.0);
    if (v * u_t).determinant() < 0.0 {
        correction[sigma.imin()] = -1.0;
    }
    let rotation = v * Matrix3::from_diagonal(&correction) * u_t;
    let translation = target_centroid - rotation * source_centroid;

    let residual_error = (source
        .iter()
        .zip(target)
        .zip(weights)
        .map(|((x, y), &w)| w * (y - rotation * x - translation).norm_squared())
        .sum::<f64>()
        / total)
        .sqrt();
    let mut extents: Vec<f64> = (scatter / total)
        .symmetric_eigenvalues()
        .iter()
        .map(|l| l.max(0.0).sqrt())
        .collect();
    extents.sort_by(|a, b| b.total_cmp(a));
    if extents[1] <= MIN_EXTENT_TO_RESIDUAL * residual_error {
        return Err(RegistrationError::DegenerateInput(format!(
            "secondary extent {:.3e} of the source points is within the alignment residual {:.3e}",
            extents[1], residual_error
        )));
    }

    let quaternion =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));
    Ok(Alignment {
        transform: SE3::from_translation_so3(translation, SO3::new(quaternion)),
        residual_error,
        condition_ratio: sorted[1] / sorted[0],
    })
}
