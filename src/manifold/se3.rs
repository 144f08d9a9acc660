//! SE(3) - rigid motions in 3D.
//!
//! Elements are an SO(3) rotation plus a 3D translation. Tangent elements are
//! ordered `[ρ(3), θ(3)]`: translational part first, rotation vector last.
//!
//! The closed forms for the left Jacobian and its inverse follow Barfoot,
//! "State Estimation for Robotics", §7.1.5:
//!
//! ```text
//! Jl(ξ) = [ Jl(θ)  Q(ρ, θ) ]      Jl⁻¹(ξ) = [ Jl⁻¹(θ)  -Jl⁻¹(θ) Q Jl⁻¹(θ) ]
//!         [ 0      Jl(θ)   ]                [ 0        Jl⁻¹(θ)           ]
//! ```
//!
//! and `Jr(ξ) = Jl(-ξ)`.

use crate::manifold::so3::{SO3, SO3Tangent};
use crate::manifold::{LieGroup, ManifoldResult, SMALL_ANGLE, Tangent, check_tangent_slice};
use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Matrix4, Matrix6, Quaternion, Translation3,
    UnitQuaternion, Vector3, Vector6,
};
use rand::Rng;
use std::fmt;

/// SE(3) group element.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

/// se(3) tangent element `[ρ, θ]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rho = self.rho();
        let theta = self.theta();
        write!(
            f,
            "se3(rho: [{:.4}, {:.4}, {:.4}], theta: [{:.4}, {:.4}, {:.4}])",
            rho.x, rho.y, rho.z, theta.x, theta.y, theta.z
        )
    }
}

impl SE3 {
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3 {
            rotation: SO3::new(rotation),
            translation,
        }
    }

    pub fn from_translation_so3(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    /// Build from a translation and a (not necessarily normalized) quaternion `(w, x, y, z)`.
    pub fn from_translation_quaternion(
        x: f64,
        y: f64,
        z: f64,
        qw: f64,
        qx: f64,
        qy: f64,
        qz: f64,
    ) -> Self {
        let quaternion = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        SE3::new(Vector3::new(x, y, z), quaternion)
    }

    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        SE3::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }

    pub fn from_isometry(isometry: Isometry3<f64>) -> Self {
        SE3::new(isometry.translation.vector, isometry.rotation)
    }

    /// Uniform rotation with a translation in `[-5, 5)³`.
    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let translation = Vector3::new(
            rng.random_range(-5.0..5.0),
            rng.random_range(-5.0..5.0),
            rng.random_range(-5.0..5.0),
        );
        SE3::from_translation_so3(translation, SO3::random_with(rng))
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn rotation_so3(&self) -> &SO3 {
        &self.rotation
    }

    pub fn rotation_quaternion(&self) -> UnitQuaternion<f64> {
        self.rotation.quaternion()
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    /// Homogeneous 4x4 matrix `[R t; 0 1]`.
    pub fn matrix(&self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }
}

impl LieGroup for SE3 {
    type TangentVector = SE3Tangent;
    type JacobianMatrix = Matrix6<f64>;
    type LieAlgebra = Matrix4<f64>;
    type Point = Vector3<f64>;

    const DIM: usize = 3;
    const DOF: usize = 6;
    const REP_SIZE: usize = 7;

    fn identity() -> Self {
        SE3::from_translation_so3(Vector3::zeros(), SO3::identity())
    }

    fn jacobian_identity() -> Self::JacobianMatrix {
        Matrix6::identity()
    }

    /// M⁻¹ = [Rᵀ, -Rᵀt; 0, 1]
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        let rotation = self.rotation.inverse(None);
        let translation = -rotation.act(&self.translation);
        SE3::from_translation_so3(translation, rotation)
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
            *jac = Matrix6::identity();
        }
        let rotation = self.rotation.compose(&other.rotation, None, None);
        let translation = self.rotation.act(&other.translation) + self.translation;
        SE3::from_translation_so3(translation, rotation)
    }

    /// τ = [Jl⁻¹(θ) t, Log(R)]
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.rotation.log(None);
        let rho = theta.left_jacobian_inv() * self.translation;
        let result = SE3Tangent::new(rho, theta.coeffs());
        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }
        result
    }

    fn act(&self, point: &Self::Point) -> Self::Point {
        self.rotation.act(point) + self.translation
    }

    /// Ad = [R, [t]×R; 0, R]
    fn adjoint(&self) -> Self::JacobianMatrix {
        let rot = self.rotation_matrix();
        let mut adj = Matrix6::zeros();
        adj.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot);
        adj.fixed_view_mut::<3, 3>(3, 3).copy_from(&rot);
        adj.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(self.translation.cross_matrix() * rot));
        adj
    }

    fn random() -> Self {
        SE3::random_with(&mut rand::rng())
    }

    fn normalize(&mut self) {
        self.rotation.normalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        self.rotation.is_valid(tolerance) && self.translation.iter().all(|v| v.is_finite())
    }

    fn jacobian_to_dmatrix(jacobian: &Self::JacobianMatrix) -> DMatrix<f64> {
        DMatrix::from_column_slice(6, 6, jacobian.as_slice())
    }
}

impl SE3Tangent {
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        let mut data = Vector6::zeros();
        data.fixed_rows_mut::<3>(0).copy_from(&rho);
        data.fixed_rows_mut::<3>(3).copy_from(&theta);
        SE3Tangent { data }
    }

    pub fn from_vector(data: Vector6<f64>) -> Self {
        SE3Tangent { data }
    }

    pub fn coeffs(&self) -> Vector6<f64> {
        self.data
    }

    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    fn so3(&self) -> SO3Tangent {
        SO3Tangent::new(self.theta())
    }

    /// Off-diagonal block Q(ρ, θ) of the SE(3) left Jacobian.
    fn q_block(&self) -> Matrix3<f64> {
        let rho_x = self.rho().cross_matrix();
        let theta_x = self.theta().cross_matrix();
        let theta_sq = self.theta().norm_squared();
        let theta = theta_sq.sqrt();

        let (b, c, d) = if theta < SMALL_ANGLE {
            (
                1.0 / 6.0 - theta_sq / 120.0 + theta_sq * theta_sq / 5040.0,
                1.0 / 24.0 - theta_sq / 720.0 + theta_sq * theta_sq / 40320.0,
                1.0 / 120.0 - theta_sq / 2520.0,
            )
        } else {
            let (sin, cos) = theta.sin_cos();
            let theta_4 = theta_sq * theta_sq;
            (
                (theta - sin) / (theta_sq * theta),
                (theta_sq + 2.0 * cos - 2.0) / (2.0 * theta_4),
                (2.0 * theta - 3.0 * sin + theta * cos) / (2.0 * theta_4 * theta),
            )
        };

        let tr = theta_x * rho_x;
        let rt = rho_x * theta_x;
        let trt = tr * theta_x;
        let ttr = theta_x * tr;
        let rtt = rt * theta_x;

        rho_x * 0.5
            + (tr + rt + trt) * b
            + (ttr + rtt - trt * 3.0) * c
            + (trt * theta_x + ttr * theta_x) * d
    }
}

impl Tangent<SE3> for SE3Tangent {
    /// Exp(τ) = [Exp(θ), Jl(θ) ρ]
    fn exp(&self, jacobian: Option<&mut Matrix6<f64>>) -> SE3 {
        let so3 = self.so3();
        let translation = so3.left_jacobian() * self.rho();
        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }
        SE3::from_translation_so3(translation, so3.exp(None))
    }

    fn right_jacobian(&self) -> Matrix6<f64> {
        SE3Tangent::from_vector(-self.data).left_jacobian()
    }

    fn left_jacobian(&self) -> Matrix6<f64> {
        let jl = self.so3().left_jacobian();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl);
        jac.fixed_view_mut::<3, 3>(0, 3).copy_from(&self.q_block());
        jac
    }

    fn right_jacobian_inv(&self) -> Matrix6<f64> {
        SE3Tangent::from_vector(-self.data).left_jacobian_inv()
    }

    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let jl_inv = self.so3().left_jacobian_inv();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl_inv);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl_inv);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-jl_inv * self.q_block() * jl_inv));
        jac
    }

    fn hat(&self) -> Matrix4<f64> {
        let mut m = Matrix4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.theta().cross_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.rho());
        m
    }

    fn zero() -> Self {
        SE3Tangent::from_vector(Vector6::zeros())
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SE3Tangent::from_vector(Vector6::from_fn(|_, _| rng.random_range(-1.0..1.0)))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }

    fn norm(&self) -> f64 {
        self.data.norm()
    }

    fn from_slice(values: &[f64]) -> ManifoldResult<Self> {
        check_tangent_slice(values, 6)?;
        Ok(SE3Tangent::from_vector(Vector6::from_column_slice(values)))
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.data.as_slice())
    }
}
