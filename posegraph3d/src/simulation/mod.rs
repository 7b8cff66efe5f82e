//! Synthetic pose graphs with known ground truth
//!
//! The trajectory is a helix with oscillating roll and pitch. Odometry links
//! consecutive poses, loop closures link poses from different turns that end
//! up close to each other. Every measurement is the true relative pose
//! perturbed by uniform noise, and the initial estimate chains the noisy
//! odometry from the first pose.

use crate::error::Result;
use crate::graph::PoseGraph;
use crate::pose::{Constraint3d, Pose3d, VertexId};
use nalgebra::Matrix6;
use posegraph_solver::math3d::{Quat, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::info;

/// Smallest standard deviation used when deriving information matrices
const MIN_SIGMA: f64 = 1e-6;

/// Configuration for [`simulate`]
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub num_poses: usize,
    pub poses_per_turn: usize,
    /// Helix radius (meters)
    pub radius: f64,
    /// Height gained per turn (meters)
    pub climb_per_turn: f64,
    /// Amplitude of the roll/pitch oscillation (radians)
    pub orientation_amplitude: f64,
    /// Half-width of the uniform translation noise (meters)
    pub translation_noise: f64,
    /// Half-width of the uniform rotation noise, per axis (radians)
    pub rotation_noise: f64,
    /// Ground-truth distance below which two poses get a loop closure
    pub loop_closure_radius: f64,
    /// Minimum id gap between loop-closure endpoints
    pub min_loop_closure_separation: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_poses: 100,
            poses_per_turn: 20,
            radius: 5.0,
            climb_per_turn: 1.0,
            orientation_amplitude: 0.2,
            translation_noise: 0.05,
            rotation_noise: 0.01,
            loop_closure_radius: 1.5,
            min_loop_closure_separation: 5,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn with_num_poses(mut self, num_poses: usize) -> Self {
        self.num_poses = num_poses;
        self
    }

    pub fn with_noise(mut self, translation_noise: f64, rotation_noise: f64) -> Self {
        self.translation_noise = translation_noise;
        self.rotation_noise = rotation_noise;
        self
    }

    pub fn with_loop_closure_radius(mut self, loop_closure_radius: f64) -> Self {
        self.loop_closure_radius = loop_closure_radius;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Ground-truth pose `index` on the helix
    pub fn ground_truth_pose(&self, index: usize) -> Pose3d {
        let turns = index as f64 / self.poses_per_turn.max(1) as f64;
        let theta = 2.0 * PI * turns;

        let position = Vec3::new(
            self.radius * theta.cos(),
            self.radius * theta.sin(),
            self.climb_per_turn * turns,
        );

        // Heading along the tangent, roll and pitch 90° apart in phase
        let heading = Quat::from_axis_angle(Vec3::new(0.0, 0.0, theta + PI / 2.0));
        let roll = self.orientation_amplitude * (2.0 * theta).sin();
        let pitch = self.orientation_amplitude * (2.0 * theta + PI / 2.0).sin();
        let tilt = Quat::from_axis_angle(Vec3::new(roll, pitch, 0.0));

        Pose3d::new(position, heading.mul(tilt))
    }

    /// diag(1/σ²) for the uniform noise bounds, translation rows first
    pub fn information(&self) -> Matrix6<f64> {
        // Uniform on [-b, b] has variance b²/3
        let sigma_t = (self.translation_noise / 3f64.sqrt()).max(MIN_SIGMA);
        let sigma_r = (self.rotation_noise / 3f64.sqrt()).max(MIN_SIGMA);
        let mut information = Matrix6::zeros();
        for i in 0..3 {
            information[(i, i)] = 1.0 / (sigma_t * sigma_t);
            information[(i + 3, i + 3)] = 1.0 / (sigma_r * sigma_r);
        }
        information
    }
}

/// A simulated graph together with the poses it was generated from
#[derive(Debug, Clone)]
pub struct SimulatedPoseGraph {
    pub ground_truth: BTreeMap<VertexId, Pose3d>,
    /// Initial estimates and noisy constraints
    pub graph: PoseGraph,
    pub num_loop_closures: usize,
}

fn uniform(rng: &mut ChaCha8Rng, bound: f64) -> f64 {
    if bound > 0.0 {
        rng.gen_range(-bound..bound)
    } else {
        0.0
    }
}

fn noisy_between(rng: &mut ChaCha8Rng, config: &SimulationConfig, a: &Pose3d, b: &Pose3d) -> Pose3d {
    let t = config.translation_noise;
    let r = config.rotation_noise;
    let noise = Pose3d::from_axis_angle(
        Vec3::new(uniform(rng, t), uniform(rng, t), uniform(rng, t)),
        Vec3::new(uniform(rng, r), uniform(rng, r), uniform(rng, r)),
    );
    a.between(b).compose(&noise)
}

/// Generate a pose graph from `config`
pub fn simulate(config: &SimulationConfig) -> Result<SimulatedPoseGraph> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let information = config.information();

    let ground_truth: Vec<Pose3d> = (0..config.num_poses)
        .map(|i| config.ground_truth_pose(i))
        .collect();

    let mut odometry = Vec::with_capacity(config.num_poses.saturating_sub(1));
    for pair in ground_truth.windows(2) {
        odometry.push(noisy_between(&mut rng, config, &pair[0], &pair[1]));
    }

    let mut graph = PoseGraph::new();
    let mut previous: Option<Pose3d> = None;
    for (i, truth) in ground_truth.iter().enumerate() {
        let estimate = match previous {
            None => *truth,
            Some(pose) => pose.compose(&odometry[i - 1]),
        };
        graph.add_pose(i as VertexId, estimate)?;
        previous = Some(estimate);
    }

    for (i, t_be) in odometry.iter().enumerate() {
        graph.add_constraint(Constraint3d::new(
            i as VertexId,
            (i + 1) as VertexId,
            *t_be,
            information,
        ))?;
    }

    let mut num_loop_closures = 0;
    let separation = config.min_loop_closure_separation.max(2);
    for (i, a) in ground_truth.iter().enumerate() {
        for (j, b) in ground_truth.iter().enumerate().skip(i + separation) {
            if (b.p - a.p).norm() < config.loop_closure_radius {
                let t_be = noisy_between(&mut rng, config, a, b);
                graph.add_constraint(Constraint3d::new(
                    i as VertexId,
                    j as VertexId,
                    t_be,
                    information,
                ))?;
                num_loop_closures += 1;
            }
        }
    }

    info!(
        "Simulated {} poses with {} odometry and {} loop-closure constraints",
        graph.len(),
        odometry.len(),
        num_loop_closures
    );

    Ok(SimulatedPoseGraph {
        ground_truth: ground_truth
            .into_iter()
            .enumerate()
            .map(|(i, pose)| (i as VertexId, pose))
            .collect(),
        graph,
        num_loop_closures,
    })
}

/// Mean distance between positions of poses present in both maps
pub fn mean_position_error(a: &BTreeMap<VertexId, Pose3d>, b: &BTreeMap<VertexId, Pose3d>) -> f64 {
    mean_over_shared(a, b, |x, y| (x.p - y.p).norm())
}

/// Mean rotation angle between orientations of poses present in both maps
pub fn mean_rotation_error(a: &BTreeMap<VertexId, Pose3d>, b: &BTreeMap<VertexId, Pose3d>) -> f64 {
    mean_over_shared(a, b, |x, y| x.q.angle_to(y.q))
}

fn mean_over_shared(
    a: &BTreeMap<VertexId, Pose3d>,
    b: &BTreeMap<VertexId, Pose3d>,
    metric: impl Fn(&Pose3d, &Pose3d) -> f64,
) -> f64 {
    let (sum, count) = a
        .iter()
        .filter_map(|(id, x)| b.get(id).map(|y| metric(x, y)))
        .fold((0.0, 0usize), |(sum, count), e| (sum + e, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
