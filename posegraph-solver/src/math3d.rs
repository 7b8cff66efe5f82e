//! 3D math primitives with automatic differentiation support
//!
//! Provides Vec3 and Quat types that work generically with any Real type,
//! enabling the same code to work with or without autodiff.
//!
//! Quaternions are Hamilton, scalar-first in memory (`w, x, y, z`). Parameter
//! blocks and files use `x, y, z, w`; convert with [`Quat::from_xyzw`] and
//! [`Quat::to_xyzw`].

use crate::Real;

// ============================================================================
// Vec3 - 3D Vector
// ============================================================================

/// 3D vector generic over any Real type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Vec3<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// Build from the first three entries of a slice
    pub fn from_slice(values: &[T]) -> Self {
        Self::new(values[0], values[1], values[2])
    }

    pub fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }
}

impl<T: Real> Vec3<T> {
    /// Create a zero vector
    pub fn zero() -> Self {
        Self::new(T::zero(), T::zero(), T::zero())
    }

    /// Dot product
    pub fn dot(self, other: Self) -> T {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm_squared(self) -> T {
        self.dot(self)
    }

    pub fn norm(self) -> T {
        self.norm_squared().sqrt()
    }

    /// Cross product
    pub fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Multiply every component by a scalar
    pub fn scale(self, s: T) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl<T: Real> std::ops::Sub for Vec3<T> {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl<T: Real> std::ops::Add for Vec3<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl<T: Real> std::ops::Neg for Vec3<T> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ============================================================================
// Quat - Unit Quaternion (for 3D rotations)
// ============================================================================

/// Quaternion for 3D rotations, generic over any Real type
///
/// Uses scalar-first convention: q = w + xi + yj + zk.
/// For rotations, quaternions should be normalized (|q| = 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat<T> {
    pub w: T,
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Quat<T> {
    pub const fn new(w: T, x: T, y: T, z: T) -> Self {
        Self { w, x, y, z }
    }

    /// Read a quaternion stored as `[x, y, z, w]`
    pub fn from_xyzw(values: &[T]) -> Self {
        Self::new(values[3], values[0], values[1], values[2])
    }

    /// Storage order `[x, y, z, w]`
    pub fn to_xyzw(self) -> [T; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

impl<T: Real> Quat<T> {
    /// Create identity quaternion (no rotation)
    pub fn identity() -> Self {
        Self::new(T::one(), T::zero(), T::zero(), T::zero())
    }

    /// Quaternion conjugate (inverse for unit quaternions)
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Vector (imaginary) part
    pub fn vec(self) -> Vec3<T> {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn norm_squared(self) -> T {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn norm(self) -> T {
        self.norm_squared().sqrt()
    }

    /// Normalize the quaternion to unit length
    pub fn normalize(self) -> Self {
        let n = self.norm();
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Hamilton product
    ///
    /// q1 * q2 represents applying rotation q1 after q2
    pub fn mul(self, other: Self) -> Self {
        Self {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    /// Rotate a 3D vector by this (unit) quaternion
    ///
    /// v' = v + w*t + q_xyz × t with t = 2 * (q_xyz × v)
    pub fn rotate_vec(self, v: Vec3<T>) -> Vec3<T> {
        let two = T::from_f64(2.0);
        let t = self.vec().cross(v).scale(two);
        v + t.scale(self.w) + self.vec().cross(t)
    }

    /// Exponential map: axis-angle vector to unit quaternion
    ///
    /// q = (cos(θ/2), sin(θ/2)/θ * ω) where θ = ||ω||. Below θ² = 1e-12 the
    /// second-order expansion is used, which keeps jets finite at zero.
    pub fn from_axis_angle(rvec: Vec3<T>) -> Self {
        let theta_sq = rvec.norm_squared();

        if theta_sq.value() < 1e-12 {
            let w = T::one() - theta_sq * T::from_f64(1.0 / 8.0);
            let k = T::from_f64(0.5) - theta_sq * T::from_f64(1.0 / 48.0);
            return Self::new(w, rvec.x * k, rvec.y * k, rvec.z * k);
        }

        let theta = theta_sq.sqrt();
        let half_theta = theta * T::from_f64(0.5);
        let k = half_theta.sin() / theta;
        Self::new(half_theta.cos(), rvec.x * k, rvec.y * k, rvec.z * k)
    }
}

impl Quat<f64> {
    /// Logarithm map: unit quaternion to axis-angle vector
    ///
    /// Picks the representative with w >= 0 so the angle lies in [0, π].
    pub fn to_axis_angle(self) -> Vec3<f64> {
        let q = if self.w < 0.0 {
            Self::new(-self.w, -self.x, -self.y, -self.z)
        } else {
            self
        };
        let sin_half = q.vec().norm();
        if sin_half < 1e-12 {
            return q.vec().scale(2.0);
        }
        let theta = 2.0 * sin_half.atan2(q.w);
        q.vec().scale(theta / sin_half)
    }

    /// Rotation angle of a unit quaternion, in [0, π]
    pub fn angle(self) -> f64 {
        self.to_axis_angle().norm()
    }

    /// Angle of the rotation taking `self` to `other`
    pub fn angle_to(self, other: Self) -> f64 {
        self.conjugate().mul(other).angle()
    }
}
