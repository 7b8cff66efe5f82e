//! Relative-pose error term
//!
//! For poses A = (p_a, q_a), B = (p_b, q_b) and a measured pose of B in A's
//! frame (p̂, q̂):
//!
//! ```text
//! q_ab = q_a⁻¹ q_b
//! p_ab = q_a⁻¹ (p_b - p_a)
//! δq   = q̂ q_ab⁻¹
//! r    = Lᵀ [p_ab - p̂ ; 2 vec(δq)]
//! ```
//!
//! where `information = L Lᵀ`, so `‖r‖² = eᵀ · information · e`.

use crate::error::{PoseGraphError, Result};
use crate::pose::{Constraint3d, Pose3d};
use nalgebra::Matrix6;
use posegraph_solver::math3d::{Quat, Vec3};
use posegraph_solver::{AutoDiffCostFunction, AutoDiffResidual, Real};

/// Total ambient size of (p_a, q_a, p_b, q_b)
pub const JET_SIZE: usize = 14;

/// Unweighted 6-vector error of the estimated relative pose against `measured`
pub fn relative_pose_error<T: Real>(
    p_a: Vec3<T>,
    q_a: Quat<T>,
    p_b: Vec3<T>,
    q_b: Quat<T>,
    measured: &Pose3d,
) -> [T; 6] {
    let q_a_inverse = q_a.conjugate();
    let q_ab_estimated = q_a_inverse.mul(q_b);
    let p_ab_estimated = q_a_inverse.rotate_vec(p_b - p_a);

    let q_measured = lift_quat(measured.q);
    let p_measured = Vec3::new(
        T::from_f64(measured.p.x),
        T::from_f64(measured.p.y),
        T::from_f64(measured.p.z),
    );

    let delta_q = q_measured.mul(q_ab_estimated.conjugate());
    let delta_p = p_ab_estimated - p_measured;
    let two = T::from_f64(2.0);

    [
        delta_p.x,
        delta_p.y,
        delta_p.z,
        two * delta_q.x,
        two * delta_q.y,
        two * delta_q.z,
    ]
}

fn lift_quat<T: Real>(q: Quat<f64>) -> Quat<T> {
    Quat::new(
        T::from_f64(q.w),
        T::from_f64(q.x),
        T::from_f64(q.y),
        T::from_f64(q.z),
    )
}

/// Weighted residual for one constraint over blocks `(p_a, q_a, p_b, q_b)`
#[derive(Debug, Clone)]
pub struct PoseGraph3dErrorTerm {
    t_ab_measured: Pose3d,
    sqrt_information: Matrix6<f64>,
}

impl PoseGraph3dErrorTerm {
    /// `sqrt_information` is the lower Cholesky factor `L` of the information
    pub fn new(t_ab_measured: Pose3d, sqrt_information: Matrix6<f64>) -> Self {
        Self {
            t_ab_measured,
            sqrt_information,
        }
    }

    /// Factor the constraint's information matrix
    ///
    /// # Errors
    ///
    /// [`PoseGraphError::NotPositiveDefinite`] if the Cholesky factorization fails.
    pub fn from_constraint(constraint: &Constraint3d) -> Result<Self> {
        let sqrt_information =
            constraint
                .sqrt_information()
                .ok_or(PoseGraphError::NotPositiveDefinite {
                    id_begin: constraint.id_begin,
                    id_end: constraint.id_end,
                })?;
        Ok(Self::new(constraint.t_be, sqrt_information))
    }

    /// Wrap in an autodiff cost function
    pub fn create(constraint: &Constraint3d) -> Result<AutoDiffCostFunction<Self, JET_SIZE>> {
        Ok(AutoDiffCostFunction::new(Self::from_constraint(constraint)?))
    }

    pub fn measurement(&self) -> &Pose3d {
        &self.t_ab_measured
    }

    pub fn sqrt_information(&self) -> &Matrix6<f64> {
        &self.sqrt_information
    }
}

impl AutoDiffResidual for PoseGraph3dErrorTerm {
    fn num_residuals(&self) -> usize {
        6
    }

    fn parameter_block_sizes(&self) -> &[usize] {
        &[3, 4, 3, 4]
    }

    fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool {
        let p_a = Vec3::from_slice(parameters[0]);
        let q_a = Quat::from_xyzw(parameters[1]);
        let p_b = Vec3::from_slice(parameters[2]);
        let q_b = Quat::from_xyzw(parameters[3]);

        let error = relative_pose_error(p_a, q_a, p_b, q_b, &self.t_ab_measured);

        // residuals = Lᵀ * error
        for (i, residual) in residuals.iter_mut().enumerate().take(6) {
            let mut sum = T::zero();
            for (j, &e) in error.iter().enumerate().skip(i) {
                sum = sum + T::from_f64(self.sqrt_information[(j, i)]) * e;
            }
            *residual = sum;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector6;
    use posegraph_solver::nalgebra::DMatrix;
    use posegraph_solver::CostFunction;
    use approx::assert_abs_diff_eq;

    fn sample_constraint(information: Matrix6<f64>) -> Constraint3d {
        let t_be = Pose3d::from_axis_angle(Vec3::new(1.0, 0.2, -0.3), Vec3::new(0.05, -0.1, 0.2));
        Constraint3d::new(0, 1, t_be, information)
    }

    fn correlated_information() -> Matrix6<f64> {
        let a = Matrix6::from_fn(|i, j| ((i * 7 + j * 3) % 5) as f64 * 0.1);
        a * a.transpose() + Matrix6::from_diagonal_element(2.0)
    }

    fn evaluate(term: &PoseGraph3dErrorTerm, a: &Pose3d, b: &Pose3d) -> [f64; 6] {
        let (pa, qa, pb, qb) = (a.position(), a.orientation(), b.position(), b.orientation());
        let mut residuals = [0.0; 6];
        assert!(term.residuals(&[&pa[..], &qa[..], &pb[..], &qb[..]], &mut residuals));
        residuals
    }

    #[test]
    fn test_zero_residual_for_identical_poses() {
        let constraint = Constraint3d::new(0, 1, Pose3d::identity(), correlated_information());
        let term = PoseGraph3dErrorTerm::from_constraint(&constraint).unwrap();

        let pose = Pose3d::from_axis_angle(Vec3::new(3.0, -1.0, 2.0), Vec3::new(0.4, 0.1, -0.6));
        assert_eq!(evaluate(&term, &pose, &pose), [0.0; 6]);
    }

    #[test]
    fn test_zero_residual_when_measurement_matches() {
        let constraint = sample_constraint(correlated_information());
        let term = PoseGraph3dErrorTerm::from_constraint(&constraint).unwrap();

        let a = Pose3d::from_axis_angle(Vec3::new(-2.0, 0.5, 1.0), Vec3::new(0.3, -0.2, 0.7));
        let b = a.compose(&constraint.t_be);
        for r in evaluate(&term, &a, &b) {
            assert_abs_diff_eq!(r, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_weighted_norm_matches_mahalanobis() {
        let information = correlated_information();
        let constraint = sample_constraint(information);
        let term = PoseGraph3dErrorTerm::from_constraint(&constraint).unwrap();

        let a = Pose3d::from_axis_angle(Vec3::new(0.1, 0.0, 0.0), Vec3::new(0.0, 0.1, 0.0));
        let b = Pose3d::from_axis_angle(Vec3::new(1.5, -0.4, 0.2), Vec3::new(0.2, 0.0, -0.1));

        let raw = relative_pose_error(a.p, a.q, b.p, b.q, &constraint.t_be);
        let raw = Vector6::from_row_slice(&raw);
        let weighted = Vector6::from_row_slice(&evaluate(&term, &a, &b));

        let mahalanobis = (raw.transpose() * information * raw)[(0, 0)];
        assert_abs_diff_eq!(weighted.norm_squared(), mahalanobis, epsilon = 1e-10);
    }

    #[test]
    fn test_not_positive_definite() {
        let mut information = Matrix6::identity();
        information[(4, 4)] = -1.0;
        let constraint = sample_constraint(information);

        assert!(matches!(
            PoseGraph3dErrorTerm::from_constraint(&constraint),
            Err(PoseGraphError::NotPositiveDefinite { id_begin: 0, id_end: 1 })
        ));
    }

    #[test]
    fn test_autodiff_matches_finite_differences() {
        let constraint = sample_constraint(correlated_information());
        let cost = PoseGraph3dErrorTerm::create(&constraint).unwrap();

        let a = Pose3d::from_axis_angle(Vec3::new(0.3, -0.1, 0.2), Vec3::new(0.1, 0.2, -0.3));
        let b = Pose3d::from_axis_angle(Vec3::new(1.1, 0.4, -0.5), Vec3::new(-0.2, 0.5, 0.1));
        let blocks: Vec<Vec<f64>> = vec![
            a.position().to_vec(),
            a.orientation().to_vec(),
            b.position().to_vec(),
            b.orientation().to_vec(),
        ];
        let views: Vec<&[f64]> = blocks.iter().map(Vec::as_slice).collect();

        let mut residuals = [0.0; 6];
        let mut jacobians: Vec<DMatrix<f64>> = blocks.iter().map(|b| DMatrix::zeros(6, b.len())).collect();
        assert!(cost.evaluate(&views, &mut residuals, Some(&mut jacobians[..])));

        let h = 1e-6;
        for (block, jacobian) in jacobians.iter().enumerate() {
            for col in 0..blocks[block].len() {
                let mut forward = blocks.clone();
                let mut backward = blocks.clone();
                forward[block][col] += h;
                backward[block][col] -= h;

                let mut r_plus = [0.0; 6];
                let mut r_minus = [0.0; 6];
                let f: Vec<&[f64]> = forward.iter().map(Vec::as_slice).collect();
                let b: Vec<&[f64]> = backward.iter().map(Vec::as_slice).collect();
                assert!(cost.evaluate(&f, &mut r_plus, None));
                assert!(cost.evaluate(&b, &mut r_minus, None));

                for row in 0..6 {
                    let numeric = (r_plus[row] - r_minus[row]) / (2.0 * h);
                    assert_abs_diff_eq!(jacobian[(row, col)], numeric, epsilon = 1e-6);
                }
            }
        }
    }
}
