//! SE(2) - rigid motions in the plane.
//!
//! Elements are an SO(2) rotation plus a 2D translation. Tangent elements are
//! ordered `[ρx, ρy, θ]`: translational part first, rotation angle last.

use crate::manifold::so2::SO2;
use crate::manifold::{LieGroup, ManifoldResult, SMALL_ANGLE, Tangent, check_tangent_slice};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2, Vector3};
use rand::Rng;
use std::fmt;

/// SE(2) group element.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: SO2,
}

impl fmt::Display for SE2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.translation.x,
            self.translation.y,
            self.angle()
        )
    }
}

/// se(2) tangent element `[ρx, ρy, θ]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SE2Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "se2(rho: [{:.4}, {:.4}], theta: {:.4})",
            self.data[0], self.data[1], self.data[2]
        )
    }
}

impl SE2 {
    pub fn new(translation: Vector2<f64>, rotation: SO2) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    /// Pose at `(x, y)` with heading `theta`.
    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        SE2::new(Vector2::new(x, y), SO2::from_angle(theta))
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_so2(&self) -> &SO2 {
        &self.rotation
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    /// Heading in (-π, π].
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.rotation_matrix()
    }

    /// Homogeneous 3x3 matrix `[R t; 0 1]`.
    pub fn matrix(&self) -> Matrix3<f64> {
        let mut m = Matrix3::identity();
        m.fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<2, 1>(0, 2).copy_from(&self.translation);
        m
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;
    type JacobianMatrix = Matrix3<f64>;
    type LieAlgebra = Matrix3<f64>;
    type Point = Vector2<f64>;

    const DIM: usize = 2;
    const DOF: usize = 3;
    const REP_SIZE: usize = 4;

    fn identity() -> Self {
        SE2::new(Vector2::zeros(), SO2::identity())
    }

    fn jacobian_identity() -> Self::JacobianMatrix {
        Matrix3::identity()
    }

    /// M⁻¹ = [Rᵀ, -Rᵀt; 0, 1]
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        let rotation = self.rotation.inverse(None);
        let translation = -rotation.act(&self.translation);
        SE2::new(translation, rotation)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = other.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        let rotation = self.rotation.compose(&other.rotation, None, None);
        let translation = self.rotation.act(&other.translation) + self.translation;
        SE2::new(translation, rotation)
    }

    /// ρ = V⁻¹(θ) t with V⁻¹ = [h·cot(h), h; -h, h·cot(h)], h = θ/2.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.angle();
        let half = 0.5 * theta;
        let diag = half_cot(theta);
        let v_inv = Matrix2::new(diag, half, -half, diag);
        let rho = v_inv * self.translation;
        let result = SE2Tangent::new(rho.x, rho.y, theta);
        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }
        result
    }

    fn act(&self, point: &Self::Point) -> Self::Point {
        self.rotation.act(point) + self.translation
    }

    /// Ad = [R, (ty, -tx)ᵀ; 0, 1]
    fn adjoint(&self) -> Self::JacobianMatrix {
        let mut adj = Matrix3::identity();
        adj.fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&self.rotation_matrix());
        adj[(0, 2)] = self.translation.y;
        adj[(1, 2)] = -self.translation.x;
        adj
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SE2::new(
            Vector2::new(rng.random_range(-5.0..5.0), rng.random_range(-5.0..5.0)),
            SO2::random(),
        )
    }

    fn normalize(&mut self) {
        self.rotation.normalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        self.rotation.is_valid(tolerance) && self.translation.iter().all(|v| v.is_finite())
    }

    fn jacobian_to_dmatrix(jacobian: &Self::JacobianMatrix) -> DMatrix<f64> {
        DMatrix::from_column_slice(3, 3, jacobian.as_slice())
    }
}

impl SE2Tangent {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent {
            data: Vector3::new(x, y, theta),
        }
    }

    pub fn from_vector(data: Vector3<f64>) -> Self {
        SE2Tangent { data }
    }

    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    pub fn rho(&self) -> Vector2<f64> {
        Vector2::new(self.data[0], self.data[1])
    }

    pub fn angle(&self) -> f64 {
        self.data[2]
    }

    /// (sin θ / θ, (1 - cos θ) / θ) with series fallbacks near zero.
    fn sinc_terms(&self) -> (f64, f64) {
        let theta = self.angle();
        if theta.abs() < SMALL_ANGLE {
            let theta_sq = theta * theta;
            (
                1.0 - theta_sq / 6.0 + theta_sq * theta_sq / 120.0,
                theta * (0.5 - theta_sq / 24.0 + theta_sq * theta_sq / 720.0),
            )
        } else {
            (theta.sin() / theta, (1.0 - theta.cos()) / theta)
        }
    }
}

/// (θ/2)·cot(θ/2), the diagonal of V⁻¹(θ).
fn half_cot(theta: f64) -> f64 {
    if theta.abs() < SMALL_ANGLE {
        let theta_sq = theta * theta;
        1.0 - theta_sq / 12.0 - theta_sq * theta_sq / 720.0
    } else {
        let half = 0.5 * theta;
        half / half.tan()
    }
}

impl Tangent<SE2> for SE2Tangent {
    /// t = V(θ) ρ with V = [a, -b; b, a].
    fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SE2 {
        let (a, b) = self.sinc_terms();
        let rho = self.rho();
        let translation = Vector2::new(a * rho.x - b * rho.y, b * rho.x + a * rho.y);
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SE2::new(translation, SO2::from_angle(self.angle()))
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = self.sinc_terms();
        let theta = self.angle();
        let (x, y) = (self.data[0], self.data[1]);
        let (c02, c12) = if theta.abs() < SMALL_ANGLE {
            let theta_sq = theta * theta;
            (
                theta * x / 6.0 - 0.5 * y + theta_sq * y / 24.0,
                0.5 * x - theta_sq * x / 24.0 + theta * y / 6.0,
            )
        } else {
            let (sin, cos) = theta.sin_cos();
            let theta_sq = theta * theta;
            (
                (theta * x - y + y * cos - x * sin) / theta_sq,
                (x + theta * y - x * cos - y * sin) / theta_sq,
            )
        };
        Matrix3::new(a, b, c02, -b, a, c12, 0.0, 0.0, 1.0)
    }

    fn left_jacobian(&self) -> Matrix3<f64> {
        SE2Tangent::from_vector(-self.data).right_jacobian()
    }

    /// [A⁻¹, -A⁻¹c; 0, 1] where Jr = [A, c; 0, 1].
    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let theta = self.angle();
        let half = 0.5 * theta;
        let diag = half_cot(theta);
        let a_inv = Matrix2::new(diag, -half, half, diag);
        let jr = self.right_jacobian();
        let c = Vector2::new(jr[(0, 2)], jr[(1, 2)]);
        let top_right = -(a_inv * c);

        let mut inv = Matrix3::identity();
        inv.fixed_view_mut::<2, 2>(0, 0).copy_from(&a_inv);
        inv[(0, 2)] = top_right.x;
        inv[(1, 2)] = top_right.y;
        inv
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        SE2Tangent::from_vector(-self.data).right_jacobian_inv()
    }

    fn hat(&self) -> Matrix3<f64> {
        let theta = self.angle();
        Matrix3::new(
            0.0, -theta, self.data[0], theta, 0.0, self.data[1], 0.0, 0.0, 0.0,
        )
    }

    fn zero() -> Self {
        SE2Tangent::from_vector(Vector3::zeros())
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SE2Tangent::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        )
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }

    fn norm(&self) -> f64 {
        self.data.norm()
    }

    fn from_slice(values: &[f64]) -> ManifoldResult<Self> {
        check_tangent_slice(values, 3)?;
        Ok(SE2Tangent::from_vector(Vector3::from_column_slice(values)))
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

    fn poses_close(a: &SE2, b: &SE2, tolerance: f64) -> bool {
        (a.translation() - b.translation()).norm() < tolerance
            && a.between(b, None, None).angle().abs() < tolerance
    }

    #[test]
    fn test_se2_identity_and_inverse() {
        let pose = SE2::from_xy_angle(1.0, -2.0, 0.8);
        let result = pose.compose(&pose.inverse(None), None, None);
        assert!(poses_close(&result, &SE2::identity(), TOLERANCE));
    }

    #[test]
    fn test_se2_exp_log_round_trip() {
        for tangent in [
            SE2Tangent::new(0.3, -0.2, 0.1),
            SE2Tangent::new(2.0, 1.0, 3.0),
            SE2Tangent::new(-1.0, 0.5, 1e-10),
            SE2Tangent::new(0.0, 0.0, 0.0),
        ] {
            let recovered = tangent.exp(None).log(None);
            assert!((recovered.coeffs() - tangent.coeffs()).norm() < TOLERANCE);
        }
    }

    #[test]
    fn test_se2_exp_pure_translation() {
        let pose = SE2Tangent::new(1.5, -0.5, 0.0).exp(None);
        assert!((pose.translation() - Vector2::new(1.5, -0.5)).norm() < TOLERANCE);
        assert!(pose.angle().abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_log_near_pi() {
        let pose = SE2::from_xy_angle(0.4, 0.2, PI - 1e-6);
        let recovered = pose.log(None).exp(None);
        assert!(poses_close(&pose, &recovered, 1e-8));
    }

    #[test]
    fn test_se2_act_consistent_with_compose() {
        let a = SE2::from_xy_angle(1.0, 2.0, 0.3);
        let b = SE2::from_xy_angle(-0.5, 0.7, -1.1);
        let p = Vector2::new(0.25, -3.0);
        let lhs = a.compose(&b, None, None).act(&p);
        let rhs = a.act(&b.act(&p));
        assert!((lhs - rhs).norm() < TOLERANCE);
    }

    #[test]
    fn test_se2_transform_points() {
        let pose = SE2::from_xy_angle(1.0, 0.0, PI / 2.0);
        let points = pose.transform_points(&[Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)]);
        assert!((points[0] - Vector2::new(1.0, 1.0)).norm() < TOLERANCE);
        assert!((points[1] - Vector2::new(0.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn test_se2_adjoint_property() {
        // Exp(Ad(X) τ) = X Exp(τ) X⁻¹
        let pose = SE2::from_xy_angle(0.5, -1.5, 0.9);
        let tangent = SE2Tangent::new(0.1, 0.2, 0.3);
        let lhs = SE2Tangent::from_vector(pose.adjoint() * tangent.coeffs()).exp(None);
        let rhs = pose
            .compose(&tangent.exp(None), None, None)
            .compose(&pose.inverse(None), None, None);
        assert!(poses_close(&lhs, &rhs, TOLERANCE));
    }

    #[test]
    fn test_se2_right_jacobian_finite_difference() {
        for tangent in [
            SE2Tangent::new(0.4, -0.3, 0.7),
            SE2Tangent::new(0.4, -0.3, 1e-10),
        ] {
            let jr = tangent.right_jacobian();
            let base = tangent.exp(None);
            for k in 0..3 {
                let mut delta = Vector3::zeros();
                delta[k] = FD_STEP;
                let perturbed = SE2Tangent::from_vector(tangent.coeffs() + delta).exp(None);
                let numeric = perturbed.right_minus(&base, None, None).coeffs() / FD_STEP;
                assert!((numeric - jr.column(k)).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn test_se2_jacobian_inverses() {
        let tangent = SE2Tangent::new(0.6, 1.2, -0.8);
        let ident = Matrix3::identity();
        assert!((tangent.right_jacobian() * tangent.right_jacobian_inv() - ident).norm() < TOLERANCE);
        assert!((tangent.left_jacobian() * tangent.left_jacobian_inv() - ident).norm() < TOLERANCE);
    }

    #[test]
    fn test_se2_compose_renormalizes() {
        let step = SE2::from_xy_angle(0.01, 0.0, 0.001);
        let mut pose = SE2::identity();
        for _ in 0..10_000 {
            pose = pose.compose(&step, None, None);
        }
        assert!(pose.is_valid(1e-12));
    }
}
