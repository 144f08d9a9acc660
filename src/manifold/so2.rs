//! SO(2) - rotations in the plane.
//!
//! Elements are stored as unit complex numbers, tangent elements as a single
//! angle in radians. SO(2) is commutative, so every Jacobian is the scalar 1
//! (or -1 for the inverse).

use crate::manifold::{LieGroup, ManifoldResult, Tangent, check_tangent_slice};
use nalgebra::{DMatrix, DVector, Matrix1, Matrix2, UnitComplex, Vector2};
use rand::Rng;
use std::fmt;

/// SO(2) group element.
#[derive(Clone, Debug, PartialEq)]
pub struct SO2 {
    complex: UnitComplex<f64>,
}

impl fmt::Display for SO2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SO2(angle: {:.4})", self.angle())
    }
}

/// so(2) tangent element: a rotation angle in radians.
#[derive(Clone, Debug, PartialEq)]
pub struct SO2Tangent {
    angle: f64,
}

impl fmt::Display for SO2Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "so2(angle: {:.4})", self.angle)
    }
}

impl SO2 {
    pub fn new(complex: UnitComplex<f64>) -> Self {
        SO2 { complex }
    }

    /// Rotation by `angle` radians.
    pub fn from_angle(angle: f64) -> Self {
        SO2::new(UnitComplex::from_angle(angle))
    }

    pub fn complex(&self) -> UnitComplex<f64> {
        self.complex
    }

    /// Angle in (-π, π].
    pub fn angle(&self) -> f64 {
        self.complex.angle()
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.complex.to_rotation_matrix().into_inner()
    }
}

impl LieGroup for SO2 {
    type TangentVector = SO2Tangent;
    type JacobianMatrix = Matrix1<f64>;
    type LieAlgebra = Matrix2<f64>;
    type Point = Vector2<f64>;

    const DIM: usize = 2;
    const DOF: usize = 1;
    const REP_SIZE: usize = 2;

    fn identity() -> Self {
        SO2::new(UnitComplex::identity())
    }

    fn jacobian_identity() -> Self::JacobianMatrix {
        Matrix1::identity()
    }

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = Matrix1::new(-1.0);
        }
        SO2::new(self.complex.inverse())
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = Matrix1::identity();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix1::identity();
        }
        let mut result = SO2::new(self.complex * other.complex);
        result.normalize();
        result
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        if let Some(jac) = jacobian {
            *jac = Matrix1::identity();
        }
        SO2Tangent::new(self.angle())
    }

    fn act(&self, point: &Self::Point) -> Self::Point {
        self.complex * point
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        Matrix1::identity()
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SO2::from_angle(rng.random_range(-std::f64::consts::PI..std::f64::consts::PI))
    }

    fn normalize(&mut self) {
        self.complex = UnitComplex::new_normalize(self.complex.into_inner());
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        (self.complex.into_inner().norm() - 1.0).abs() < tolerance
    }

    fn jacobian_to_dmatrix(jacobian: &Self::JacobianMatrix) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, jacobian[(0, 0)])
    }
}

impl SO2Tangent {
    pub fn new(angle: f64) -> Self {
        SO2Tangent { angle }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }
}

impl Tangent<SO2> for SO2Tangent {
    fn exp(&self, jacobian: Option<&mut Matrix1<f64>>) -> SO2 {
        if let Some(jac) = jacobian {
            *jac = Matrix1::identity();
        }
        SO2::from_angle(self.angle)
    }

    fn right_jacobian(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn left_jacobian(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn right_jacobian_inv(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn left_jacobian_inv(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn hat(&self) -> Matrix2<f64> {
        Matrix2::new(0.0, -self.angle, self.angle, 0.0)
    }

    fn zero() -> Self {
        SO2Tangent::new(0.0)
    }

    fn random() -> Self {
        let mut rng = rand::rng();
        SO2Tangent::new(rng.random_range(-1.0..1.0))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.angle.abs() < tolerance
    }

    fn norm(&self) -> f64 {
        self.angle.abs()
    }

    fn from_slice(values: &[f64]) -> ManifoldResult<Self> {
        check_tangent_slice(values, 1)?;
        Ok(SO2Tangent::new(values[0]))
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_element(1, self.angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_so2_inverse_compose_is_identity() {
        let rot = SO2::from_angle(0.7);
        let result = rot.compose(&rot.inverse(None), None, None);
        assert!(result.angle().abs() < TOLERANCE);
    }

    #[test]
    fn test_so2_log_wraps_angle() {
        let rot = SO2::from_angle(3.0 * PI / 2.0);
        assert!((rot.log(None).angle() + PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_so2_act() {
        let rot = SO2::from_angle(PI / 2.0);
        let p = rot.act(&Vector2::new(1.0, 0.0));
        assert!((p - Vector2::new(0.0, 1.0)).norm() < TOLERANCE);
    }

    #[test]
    fn test_so2_from_slice() {
        assert_eq!(SO2Tangent::from_slice(&[0.3]), Ok(SO2Tangent::new(0.3)));
        assert!(SO2Tangent::from_slice(&[0.3, 0.1]).is_err());
    }
}
