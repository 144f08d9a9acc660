//! Arun's method: least-squares rigid alignment with equal weights.

use super::{Alignment, RegistrationResult, check_correspondences, solve_rigid};
use crate::manifold::SE3;
use nalgebra::Vector3;
use tracing::debug;

/// Transform `T` minimizing `Σ ‖targetᵢ - T sourceᵢ‖²`.
///
/// Requires at least three finite, non-collinear correspondences.
pub fn align(source: &[Vector3<f64>], target: &[Vector3<f64>]) -> RegistrationResult<SE3> {
    Ok(align_with_error(source, target)?.transform)
}

/// Like [`align`], also reporting the RMS residual and conditioning.
pub fn align_with_error(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
) -> RegistrationResult<Alignment> {
    check_correspondences(source, target)?;
    let alignment = solve_rigid(source, target, &vec![1.0; source.len()])?;
    debug!(
        "Aligned {} correspondences, rms {:.3e}, condition {:.3e}",
        source.len(),
        alignment.residual_error,
        alignment.condition_ratio
    );
    Ok(alignment)
}
