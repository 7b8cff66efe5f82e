//! Local parameterizations for parameter blocks
//!
//! A manifold tells the solver how to step a parameter block that lives on a
//! curved space. The solver works in the tangent space, retracts with
//! [`Manifold::plus`], and chains ambient Jacobians through
//! [`Manifold::plus_jacobian`].

use crate::math3d::{Quat, Vec3};
use nalgebra::DMatrix;
use std::fmt::Debug;

pub trait Manifold: Debug + Send + Sync {
    /// Number of stored values
    fn ambient_size(&self) -> usize;

    /// Degrees of freedom
    fn tangent_size(&self) -> usize;

    /// x_plus_delta = x ⊞ delta
    fn plus(&self, x: &[f64], delta: &[f64], x_plus_delta: &mut [f64]);

    /// d(x ⊞ δ)/dδ at δ = 0, ambient_size × tangent_size
    fn plus_jacobian(&self, x: &[f64]) -> DMatrix<f64>;
}

/// Flat space: plus is vector addition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EuclideanManifold {
    size: usize,
}

impl EuclideanManifold {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Manifold for EuclideanManifold {
    fn ambient_size(&self) -> usize {
        self.size
    }

    fn tangent_size(&self) -> usize {
        self.size
    }

    fn plus(&self, x: &[f64], delta: &[f64], x_plus_delta: &mut [f64]) {
        for ((out, xi), di) in x_plus_delta.iter_mut().zip(x).zip(delta) {
            *out = xi + di;
        }
    }

    fn plus_jacobian(&self, _x: &[f64]) -> DMatrix<f64> {
        DMatrix::identity(self.size, self.size)
    }
}

/// Unit quaternions stored as `[x, y, z, w]`
///
/// `x ⊞ δ = normalize(exp(δ) ⊗ x)`, where δ is an axis-angle vector (full
/// angle) applied on the left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuaternionManifold;

impl Manifold for QuaternionManifold {
    fn ambient_size(&self) -> usize {
        4
    }

    fn tangent_size(&self) -> usize {
        3
    }

    fn plus(&self, x: &[f64], delta: &[f64], x_plus_delta: &mut [f64]) {
        let q = Quat::from_xyzw(x);
        let dq = Quat::from_axis_angle(Vec3::from_slice(delta));
        let result = dq.mul(q).normalize();
        x_plus_delta.copy_from_slice(&result.to_xyzw());
    }

    fn plus_jacobian(&self, x: &[f64]) -> DMatrix<f64> {
        let (qx, qy, qz, qw) = (x[0], x[1], x[2], x[3]);
        #[rustfmt::skip]
        let jacobian = DMatrix::from_row_slice(4, 3, &[
             qw,  qz, -qy,
            -qz,  qw,  qx,
             qy, -qx,  qw,
            -qx, -qy, -qz,
        ]);
        jacobian * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_quaternion() -> [f64; 4] {
        let q = Quat::from_axis_angle(Vec3::new(0.4, -0.7, 0.2));
        q.to_xyzw()
    }

    #[test]
    fn test_quaternion_plus_zero_is_identity() {
        let x = unit_quaternion();
        let mut out = [0.0; 4];
        QuaternionManifold.plus(&x, &[0.0, 0.0, 0.0], &mut out);
        for i in 0..4 {
            assert_abs_diff_eq!(out[i], x[i], epsilon = 1e-15);
        }
    }

    #[test]
    fn test_quaternion_plus_stays_unit() {
        let x = unit_quaternion();
        let mut out = [0.0; 4];
        QuaternionManifold.plus(&x, &[1.2, -0.3, 2.5], &mut out);
        let norm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_quaternion_plus_rotates_on_the_left() {
        let x = unit_quaternion();
        let delta = [0.0, 0.0, 0.3];
        let mut out = [0.0; 4];
        QuaternionManifold.plus(&x, &delta, &mut out);

        let expected = Quat::from_axis_angle(Vec3::new(0.0, 0.0, 0.3))
            .mul(Quat::from_xyzw(&x))
            .to_xyzw();
        for i in 0..4 {
            assert_abs_diff_eq!(out[i], expected[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_quaternion_plus_jacobian_matches_finite_differences() {
        let x = unit_quaternion();
        let jacobian = QuaternionManifold.plus_jacobian(&x);
        let h = 1e-6;

        for j in 0..3 {
            let mut forward = [0.0; 3];
            let mut backward = [0.0; 3];
            forward[j] = h;
            backward[j] = -h;

            let mut plus = [0.0; 4];
            let mut minus = [0.0; 4];
            QuaternionManifold.plus(&x, &forward, &mut plus);
            QuaternionManifold.plus(&x, &backward, &mut minus);

            for i in 0..4 {
                let numeric = (plus[i] - minus[i]) / (2.0 * h);
                assert_abs_diff_eq!(jacobian[(i, j)], numeric, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_euclidean_plus() {
        let manifold = EuclideanManifold::new(3);
        let mut out = [0.0; 3];
        manifold.plus(&[1.0, 2.0, 3.0], &[0.5, -1.0, 0.0], &mut out);
        assert_eq!(out, [1.5, 1.0, 3.0]);
        assert_eq!(manifold.plus_jacobian(&out), DMatrix::identity(3, 3));
    }
}
