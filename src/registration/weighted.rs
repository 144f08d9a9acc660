//! Weighted rigid alignment.
//!
//! Each correspondence contributes with a non-negative weight, for example an
//! inverse variance or an inlier score. Zero weights remove a point from the
//! fit; at least three points must keep a positive weight.

use super::{Alignment, RegistrationResult, check_correspondences, check_weights, solve_rigid};
use crate::manifold::SE3;
use nalgebra::Vector3;
use tracing::debug;

/// Transform `T` minimizing `Σ wᵢ ‖targetᵢ - T sourceᵢ‖²`.
pub fn align_weighted(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
    weights: &[f64],
) -> RegistrationResult<SE3> {
    Ok(align_weighted_with_error(source, target, weights)?.transform)
}

/// Like [`align_weighted`], also reporting the weighted RMS residual and conditioning.
pub fn align_weighted_with_error(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
    weights: &[f64],
) -> RegistrationResult<Alignment> {
    check_correspondences(source, target)?;
    check_weights(weights, source.len())?;
    let alignment = solve_rigid(source, target, weights)?;
    debug!(
        "Aligned {} weighted correspondences, total weight {:.3e}, rms {:.3e}",
        source.len(),
        weights.iter().sum::<f64>(),
        alignment.residual_error
    );
    Ok(alignment)
}
