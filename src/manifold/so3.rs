//! SO(3) - rotations in 3D.
//!
//! Elements are stored as unit quaternions and tangent elements as rotation
//! vectors (axis scaled by angle).

use crate::manifold::{LieGroup, ManifoldResult, SMALL_ANGLE, Tangent, check_tangent_slice};
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};
use rand::Rng;
use std::f64::consts::TAU;
use std::fmt;

/// SO(3) group element.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// so(3) tangent element: a rotation vector.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "so3(theta: [{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl SO3 {
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Project an arbitrary 3x3 matrix onto the closest rotation.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_matrix(matrix))
    }

    /// Rotation drawn uniformly from SO(3) (Shoemake's subgroup algorithm).
    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let u: f64 = rng.random();
        let a = TAU * rng.random::<f64>();
        let b = TAU * rng.random::<f64>();
        let (s1, s2) = ((1.0 - u).sqrt(), u.sqrt());
        SO3::new(UnitQuaternion::new_normalize(Quaternion::new(
            s2 * b.cos(),
            s1 * a.sin(),
            s1 * a.cos(),
            s2 * b.sin(),
        )))
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Rotation angle in [0, π].
    pub fn angle(&self) -> f64 {
        self.log(None).norm()
    }
}

impl LieGroup for SO3 {
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;
    type LieAlgebra = Matrix3<f64>;
    type Point = Vector3<f64>;

    const DIM: usize = 3;
    const DOF: usize = 3;
    const REP_SIZE: usize = 4;

    fn identity() -> Self {
        SO3::new(UnitQuaternion::identity())
    }

    fn jacobian_identity() -> Self::JacobianMatrix {
        Matrix3::identity()
    }

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.rotation_matrix();
        }
        SO3::new(self.quaternion.inverse())
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = other.rotation_matrix().transpose();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        let mut result = SO3::new(self.quaternion * other.quaternion);
        result.normalize();
        result
    }

    /// θ = 2·atan2(|v|, w)·v/|v| on the hemisphere w ≥ 0.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let q = self.quaternion.quaternion();
        let (w, v) = if q.w < 0.0 {
            (-q.w, -q.imag())
        } else {
            (q.w, q.imag())
        };
        let sin_half = v.norm();
        let scale = if sin_half > f64::EPSILON {
            2.0 * sin_half.atan2(w) / sin_half
        } else {
            2.0 / w
        };
        let result = SO3Tangent::new(v * scale);
        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }
        result
    }

    fn act(&self, point: &Self::Point) -> Self::Point {
        self.quaternion * point
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        self.rotation_matrix()
    }

    fn random() -> Self {
        SO3::random_with(&mut rand::rng())
    }

    fn normalize(&mut self) {
        self.quaternion = UnitQuaternion::new_normalize(self.quaternion.into_inner());
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        (self.quaternion.quaternion().norm() - 1.0).abs() < tolerance
    }

    fn jacobian_to_dmatrix(jacobian: &Self::JacobianMatrix) -> DMatrix<f64> {
        DMatrix::from_column_slice(3, 3, jacobian.as_slice())
    }
}

impl SO3Tangent {
    pub fn new(data: Vector3<f64>) -> Self {
        SO3Tangent { data }
    }

    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Coefficients (a, b) of Jl = I + a[θ]× + b[θ]×².
    fn left_jacobian_coeffs(&self) -> (f64, f64) {
        let theta_sq = self.data.norm_squared();
        let theta = theta_sq.sqrt();
        if theta < SMALL_ANGLE {
            (
                0.5 - theta_sq / 24.0 + theta_sq * theta_sq / 720.0,
                1.0 / 6.0 - theta_sq / 120.0 + theta_sq * theta_sq / 5040.0,
            )
        } else {
            (
                (1.0 - theta.cos()) / theta_sq,
                (theta - theta.sin()) / (theta_sq * theta),
            )
        }
    }

    /// Coefficient c of Jl⁻¹ = I - ½[θ]× + c[θ]×².
    fn left_jacobian_inv_coeff(&self) -> f64 {
        let theta_sq = self.data.norm_squared();
        let theta = theta_sq.sqrt();
        if theta < SMALL_ANGLE {
            1.0 / 12.0 + theta_sq / 720.0 + theta_sq * theta_sq / 30240.0
        } else {
            let half = 0.5 * theta;
            1.0 / theta_sq - half.cos() / (half.sin() * 2.0 * theta)
        }
    }
}

impl Tangent<SO3> for SO3Tangent {
    fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SO3 {
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SO3::new(UnitQuaternion::from_scaled_axis(self.data))
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        self.left_jacobian().transpose()
    }

    fn left_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = self.left_jacobian_coeffs();
        let skew = self.hat();
        Matrix3::identity() + skew * a + skew * skew * b
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        self.left_jacobian_inv().transpose()
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let c = self.left_jacobian_inv_coeff();
        let skew = self.hat();
        Matrix3::identity() - skew * 0.5 + skew * skew * c
    }

    fn hat(&self) -> Matrix3<f64> {
        self.data.cross_matrix()
    }

    fn zero() -> Self {
        SO3Tangent::new(Vector3::zeros())
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SO3Tangent::new(Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        ))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }

    fn norm(&self) -> f64 {
        self.data.norm()
    }

    fn from_slice(values: &[f64]) -> ManifoldResult<Self> {
        check_tangent_slice(values, 3)?;
        Ok(SO3Tangent::new(Vector3::from_column_slice(values)))
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-9;
    const FD_STEP: f64 = 1e-6;

    #[test]
    fn test_so3_random_with_is_reproducible_and_uniform() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut a = StdRng::seed_from_u64(5);
        let mut b = StdRng::seed_from_u64(5);
        assert_eq!(SO3::random_with(&mut a), SO3::random_with(&mut b));

        // For uniform rotations E|w| = 4 / (3π).
        let mut rng = StdRng::seed_from_u64(99);
        let samples = 4000;
        let mean_abs_w = (0..samples)
            .map(|_| {
                let r = SO3::random_with(&mut rng);
                assert!(r.is_valid(1e-12));
                r.quaternion().w.abs()
            })
            .sum::<f64>()
            / samples as f64;
        assert!((mean_abs_w - 4.0 / (3.0 * PI)).abs() < 0.02);
    }

    #[test]
    fn test_so3_compose_renormalizes() {
        let step = SO3::new(UnitQuaternion::from_euler_angles(0.001, -0.002, 0.0015));
        let mut rotation = SO3::identity();
        for _ in 0..10_000 {
            rotation = rotation.compose(&step, None, None);
        }
        assert!(rotation.is_valid(1e-12));
    }

    #[test]
    fn test_so3_exp_log_round_trip() {
        for v in [
            Vector3::new(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, -0.5),
            Vector3::new(1e-12, 0.0, -1e-12),
            Vector3::new(0.0, 0.0, PI - 1e-7),
        ] {
            let tangent = SO3Tangent::new(v);
            let recovered = tangent.exp(None).log(None);
            assert!((recovered.coeffs() - v).norm() < 1e-8, "{v:?}");
        }
    }

    #[test]
    fn test_so3_log_takes_short_way() {
        // Rotation by 3π/2 about z is logged as -π/2.
        let rot = SO3::new(UnitQuaternion::from_scaled_axis(Vector3::new(
            0.0,
            0.0,
            1.5 * PI,
        )));
        let tangent = rot.log(None);
        assert!((tangent.coeffs() - Vector3::new(0.0, 0.0, -0.5 * PI)).norm() < TOLERANCE);
    }

    #[test]
    fn test_so3_inverse_compose_is_identity() {
        let rot = SO3::from_euler_angles(0.3, -0.4, 1.2);
        let result = rot.compose(&rot.inverse(None), None, None);
        assert!(result.log(None).norm() < TOLERANCE);
    }

    #[test]
    fn test_so3_right_jacobian_finite_difference() {
        for v in [Vector3::new(0.4, -0.1, 0.9), Vector3::new(1e-10, 0.0, 0.0)] {
            let tangent = SO3Tangent::new(v);
            let jr = tangent.right_jacobian();
            let base = tangent.exp(None);
            for k in 0..3 {
                let mut delta = Vector3::zeros();
                delta[k] = FD_STEP;
                let perturbed = SO3Tangent::new(v + delta).exp(None);
                let numeric = perturbed.right_minus(&base, None, None).coeffs() / FD_STEP;
                assert!((numeric - jr.column(k)).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn test_so3_jacobian_inverses() {
        let tangent = SO3Tangent::new(Vector3::new(0.7, -1.1, 0.4));
        let ident = Matrix3::identity();
        assert!((tangent.left_jacobian() * tangent.left_jacobian_inv() - ident).norm() < TOLERANCE);
        assert!(
            (tangent.right_jacobian() * tangent.right_jacobian_inv() - ident).norm() < TOLERANCE
        );
    }

    #[test]
    fn test_so3_left_jacobian_is_adjoint_times_right() {
        let tangent = SO3Tangent::new(Vector3::new(0.2, 0.5, -0.3));
        let lhs = tangent.left_jacobian();
        let rhs = tangent.exp(None).adjoint() * tangent.right_jacobian();
        assert!((lhs - rhs).norm() < TOLERANCE);
    }
}
