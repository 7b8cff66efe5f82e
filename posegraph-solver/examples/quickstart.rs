//! Quickstart: autodiff, then a small rotation fit on the quaternion manifold
//!
//! Run with: cargo run -p posegraph-solver --example quickstart

use posegraph_solver::math3d::{Quat, Vec3};
use posegraph_solver::{
    AutoDiffCostFunction, AutoDiffResidual, HuberLoss, Jet, LevenbergMarquardt, Problem,
    QuaternionManifold, Real, Solver,
};
use std::sync::Arc;

/// Residual `R(q) x - y` for one point correspondence
struct RotatedPoint {
    x: [f64; 3],
    y: [f64; 3],
}

impl AutoDiffResidual for RotatedPoint {
    fn num_residuals(&self) -> usize {
        3
    }

    fn parameter_block_sizes(&self) -> &[usize] {
        &[4]
    }

    fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool {
        let q = Quat::from_xyzw(parameters[0]);
        let x = Vec3::new(T::from_f64(self.x[0]), T::from_f64(self.x[1]), T::from_f64(self.x[2]));
        let rotated = q.rotate_vec(x);
        residuals[0] = rotated.x - T::from_f64(self.y[0]);
        residuals[1] = rotated.y - T::from_f64(self.y[1]);
        residuals[2] = rotated.z - T::from_f64(self.y[2]);
        true
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Forward-mode autodiff on plain expressions
    let x = Jet::<2>::variable(3.0, 0);
    let y = Jet::<2>::variable(4.0, 1);
    let f = x * x + y * y;
    println!("f(x, y) = x² + y² at (3, 4): {} with gradient {:?}", f.value, f.derivs);

    // Recover a rotation from noisy correspondences, one of them an outlier
    let truth = Quat::from_axis_angle(Vec3::new(0.3, -0.5, 0.9));
    let points = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, -1.0],
        [-2.0, 0.5, 0.3],
    ];

    let mut problem = Problem::new();
    let q = problem.add_parameter_block(&[0.0, 0.0, 0.0, 1.0]);
    problem.set_manifold(q, Arc::new(QuaternionManifold))?;

    for (i, x) in points.iter().enumerate() {
        let mut y = truth.rotate_vec(Vec3::new(x[0], x[1], x[2])).to_array();
        if i == 4 {
            y[2] += 3.0;
        }
        let cost = AutoDiffCostFunction::<_, 4>::new(RotatedPoint { x: *x, y });
        problem.add_residual_block(Box::new(cost), Some(Box::new(HuberLoss::new(0.1))), &[q])?;
    }

    let summary = LevenbergMarquardt::default().solve(&mut problem);
    println!("{}", summary.full_report());

    let estimate = Quat::from_xyzw(problem.parameter_block(q)?);
    println!("rotation error: {:.2e} rad", estimate.angle_to(truth));
    Ok(())
}
