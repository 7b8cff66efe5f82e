//! Poses and relative-pose constraints

use nalgebra::Matrix6;
use posegraph_solver::math3d::{Quat, Vec3};

/// Vertex identifier, unique within a graph
pub type VertexId = i32;

/// Normalize a quaternion, or `None` if its norm is zero or not finite
pub fn normalized_quaternion(q: Quat<f64>) -> Option<Quat<f64>> {
    let norm = q.norm();
    (norm.is_finite() && norm > 0.0).then(|| q.normalize())
}

/// Rigid transform in 3-D: position plus unit quaternion orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose3d {
    pub p: Vec3<f64>,
    pub q: Quat<f64>,
}

impl Pose3d {
    pub fn new(p: Vec3<f64>, q: Quat<f64>) -> Self {
        Self { p, q }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quat::identity())
    }

    /// Rotation about the axis-angle vector `rvec`, then translation by `p`
    pub fn from_axis_angle(p: Vec3<f64>, rvec: Vec3<f64>) -> Self {
        Self::new(p, Quat::from_axis_angle(rvec))
    }

    /// Rebuild from a position block and an `[x, y, z, w]` orientation block,
    /// renormalizing the quaternion
    pub fn from_parameters(position: &[f64], orientation: &[f64]) -> Self {
        let q = Quat::from_xyzw(orientation);
        Self::new(
            Vec3::from_slice(position),
            normalized_quaternion(q).unwrap_or(q),
        )
    }

    pub fn position(&self) -> [f64; 3] {
        self.p.to_array()
    }

    /// Orientation in `[x, y, z, w]` order
    pub fn orientation(&self) -> [f64; 4] {
        self.q.to_xyzw()
    }

    /// Restore ‖q‖ = 1 after serialization drift
    pub fn renormalize(&mut self) {
        if let Some(q) = normalized_quaternion(self.q) {
            self.q = q;
        }
    }

    /// `self ∘ other`: apply `other`, then `self`
    pub fn compose(&self, other: &Pose3d) -> Pose3d {
        Pose3d::new(self.p + self.q.rotate_vec(other.p), self.q.mul(other.q))
    }

    pub fn inverse(&self) -> Pose3d {
        let q_inv = self.q.conjugate();
        Pose3d::new(-q_inv.rotate_vec(self.p), q_inv)
    }

    /// Pose of `other` expressed in this pose's frame
    pub fn between(&self, other: &Pose3d) -> Pose3d {
        self.inverse().compose(other)
    }

    pub fn transform_point(&self, point: Vec3<f64>) -> Vec3<f64> {
        self.p + self.q.rotate_vec(point)
    }
}

impl Default for Pose3d {
    fn default() -> Self {
        Self::identity()
    }
}

/// Relative-pose measurement between two vertices
///
/// `t_be` is the pose of `id_end` in the frame of `id_begin`. The information
/// matrix orders its rows `[x, y, z, θx, θy, θz]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint3d {
    pub id_begin: VertexId,
    pub id_end: VertexId,
    pub t_be: Pose3d,
    pub information: Matrix6<f64>,
}

impl Constraint3d {
    pub fn new(id_begin: VertexId, id_end: VertexId, t_be: Pose3d, information: Matrix6<f64>) -> Self {
        Self {
            id_begin,
            id_end,
            t_be,
            information,
        }
    }

    /// Lower Cholesky factor `L` with `information = L Lᵀ`
    pub fn sqrt_information(&self) -> Option<Matrix6<f64>> {
        self.information.cholesky().map(|chol| chol.l())
    }
}

/// Symmetric matrix from its upper triangle in row-major order:
/// (0,0) (0,1) … (0,5) (1,1) … (5,5)
pub fn information_from_upper_triangle(upper: &[f64; 21]) -> Matrix6<f64> {
    let mut information = Matrix6::zeros();
    let mut k = 0;
    for i in 0..6 {
        for j in i..6 {
            information[(i, j)] = upper[k];
            information[(j, i)] = upper[k];
            k += 1;
        }
    }
    information
}

/// Upper triangle of `information` in row-major order
pub fn upper_triangle(information: &Matrix6<f64>) -> [f64; 21] {
    let mut upper = [0.0; 21];
    let mut k = 0;
    for i in 0..6 {
        for j in i..6 {
            upper[k] = information[(i, j)];
            k += 1;
        }
    }
    upper
}
