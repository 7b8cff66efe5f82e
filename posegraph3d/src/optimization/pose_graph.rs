//! Building and solving the pose-graph least-squares problem

use super::error_term::PoseGraph3dErrorTerm;
use super::PoseGraphConfig;
use crate::error::{PoseGraphError, Result};
use crate::graph::PoseGraph;
use crate::pose::{Pose3d, VertexId};
use posegraph_solver::{Manifold, ParameterBlockId, Problem, QuaternionManifold, Solver, Summary};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Parameter blocks holding one pose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseBlocks {
    pub position: ParameterBlockId,
    pub orientation: ParameterBlockId,
}

/// A problem built from a graph, holding the graph exclusively until solved
pub struct PoseGraphProblem<'g> {
    graph: &'g mut PoseGraph,
    problem: Problem,
    blocks: BTreeMap<VertexId, PoseBlocks>,
    anchor: VertexId,
}

/// Solver outcome for one optimization run
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub summary: Summary,
    pub usable: bool,
}

/// Build the least-squares problem for `graph`
///
/// One residual block per constraint over `(p_a, q_a, p_b, q_b)`, the
/// quaternion manifold on every orientation block, and both blocks of the
/// first participating vertex held constant. Returns `Ok(None)` when the
/// graph has no constraints.
///
/// # Errors
///
/// Fails if a constraint references a missing pose or carries an information
/// matrix that is not positive definite. No constraint is ever skipped.
pub fn build_optimization_problem(graph: &mut PoseGraph) -> Result<Option<PoseGraphProblem<'_>>> {
    if graph.constraints().is_empty() {
        info!("No constraints, no problem to optimize.");
        return Ok(None);
    }

    let mut problem = Problem::new();
    let mut blocks: BTreeMap<VertexId, PoseBlocks> = BTreeMap::new();
    let quaternion_manifold: Arc<dyn Manifold> = Arc::new(QuaternionManifold);

    for constraint in graph.constraints() {
        let cost = PoseGraph3dErrorTerm::create(constraint)?;

        let mut pose_blocks = |id: VertexId| -> Result<PoseBlocks> {
            if let Some(existing) = blocks.get(&id) {
                return Ok(*existing);
            }
            let pose = graph.pose(id).ok_or(PoseGraphError::MissingVertex { id })?;
            let position = problem.add_parameter_block(&pose.position());
            let orientation = problem.add_parameter_block(&pose.orientation());
            problem.set_manifold(orientation, Arc::clone(&quaternion_manifold))?;
            let created = PoseBlocks {
                position,
                orientation,
            };
            blocks.insert(id, created);
            Ok(created)
        };

        let begin = pose_blocks(constraint.id_begin)?;
        let end = pose_blocks(constraint.id_end)?;

        problem.add_residual_block(
            Box::new(cost),
            None,
            &[begin.position, begin.orientation, end.position, end.orientation],
        )?;
    }

    // Gauge freedom: hold the first participating pose fixed
    let Some((&anchor, anchor_blocks)) = blocks.iter().next() else {
        return Ok(None);
    };
    problem.set_parameter_block_constant(anchor_blocks.position)?;
    problem.set_parameter_block_constant(anchor_blocks.orientation)?;

    let components = graph
        .connected_components()
        .into_iter()
        .filter(|component| component.len() > 1)
        .count();
    if components > 1 {
        warn!(
            "pose graph has {} connected components; only the one containing vertex {} is anchored",
            components, anchor
        );
    }

    info!(
        "Built problem with {} residual blocks over {} poses (anchor {})",
        problem.num_residual_blocks(),
        blocks.len(),
        anchor
    );

    Ok(Some(PoseGraphProblem {
        graph,
        problem,
        blocks,
        anchor,
    }))
}

impl<'g> PoseGraphProblem<'g> {
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// Vertex whose blocks are held constant
    pub fn anchor(&self) -> VertexId {
        self.anchor
    }

    pub fn pose_blocks(&self, id: VertexId) -> Option<PoseBlocks> {
        self.blocks.get(&id).copied()
    }

    /// Number of poses with parameter blocks
    pub fn num_poses(&self) -> usize {
        self.blocks.len()
    }

    /// Run `solver` and, if the result is usable, write renormalized poses
    /// back into the graph. An unusable result leaves the graph untouched.
    pub fn solve<S: Solver>(mut self, solver: &S) -> Result<SolveReport> {
        let summary = solver.solve(&mut self.problem);
        let usable = summary.is_solution_usable();
        info!("{}", summary.brief_report());

        if usable {
            for (&id, blocks) in &self.blocks {
                let position = self.problem.parameter_block(blocks.position)?;
                let orientation = self.problem.parameter_block(blocks.orientation)?;
                let pose = self
                    .graph
                    .pose_mut(id)
                    .ok_or(PoseGraphError::MissingVertex { id })?;
                *pose = Pose3d::from_parameters(position, orientation);
            }
        }

        Ok(SolveReport { summary, usable })
    }
}

/// Solve a built problem; an unusable solution is an error carrying the
/// solver's full report
pub fn solve_optimization_problem<S: Solver>(
    problem: PoseGraphProblem<'_>,
    solver: &S,
) -> Result<SolveReport> {
    let report = problem.solve(solver)?;
    if !report.usable {
        return Err(PoseGraphError::SolveFailed {
            report: report.summary.full_report(),
        });
    }
    Ok(report)
}

/// Build and solve in one step. `Ok(None)` means there was nothing to optimize.
pub fn optimize_pose_graph(graph: &mut PoseGraph, config: &PoseGraphConfig) -> Result<Option<SolveReport>> {
    match build_optimization_problem(graph)? {
        Some(problem) => solve_optimization_problem(problem, &config.solver()).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Constraint3d;
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix6;
    use posegraph_solver::math3d::{Quat, Vec3};
    use posegraph_solver::{LevenbergMarquardt, LinearSolverType, TerminationType};

    fn single_edge_graph() -> PoseGraph {
        let mut graph = PoseGraph::new();
        graph.add_pose(0, Pose3d::identity()).unwrap();
        graph.add_pose(1, Pose3d::identity()).unwrap();
        let t_be = Pose3d::new(Vec3::new(1.0, 0.0, 0.0), Quat::identity());
        graph
            .add_constraint(Constraint3d::new(0, 1, t_be, Matrix6::identity()))
            .unwrap();
        graph
    }

    /// A square loop with a noisy closing edge and perturbed initial poses
    fn square_graph() -> PoseGraph {
        let mut graph = PoseGraph::new();
        let quarter_turn = Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let step = Pose3d::from_axis_angle(Vec3::new(2.0, 0.0, 0.0), quarter_turn);

        let mut truth = Pose3d::identity();
        for id in 0..4 {
            let jitter = Pose3d::from_axis_angle(
                Vec3::new(0.1 * id as f64, -0.05 * id as f64, 0.02),
                Vec3::new(0.01, -0.02, 0.03 * id as f64),
            );
            let initial = if id == 0 { truth } else { truth.compose(&jitter) };
            graph.add_pose(id, initial).unwrap();
            truth = truth.compose(&step);
        }

        let information = Matrix6::from_diagonal_element(100.0);
        for id in 0..3 {
            graph
                .add_constraint(Constraint3d::new(id, id + 1, step, information))
                .unwrap();
        }
        let closing = step.compose(&Pose3d::from_axis_angle(
            Vec3::new(0.02, -0.01, 0.0),
            Vec3::new(0.0, 0.0, 0.01),
        ));
        graph
            .add_constraint(Constraint3d::new(3, 0, closing, information))
            .unwrap();
        graph
    }

    #[test]
    fn test_single_edge_convergence() {
        let mut graph = single_edge_graph();
        let problem = build_optimization_problem(&mut graph).unwrap().unwrap();
        assert_eq!(problem.anchor(), 0);
        assert_eq!(problem.num_poses(), 2);

        let report = solve_optimization_problem(problem, &LevenbergMarquardt::default()).unwrap();
        assert!(report.usable);
        assert_eq!(report.summary.termination_type, TerminationType::Convergence);

        let anchor = graph.pose(0).unwrap();
        assert_eq!(anchor, &Pose3d::identity());

        let moved = graph.pose(1).unwrap();
        assert_abs_diff_eq!(moved.p.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(moved.p.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(moved.p.z, 0.0, epsilon = 1e-6);
        assert!(moved.q.angle_to(Quat::identity()) < 1e-6);
        assert_abs_diff_eq!(moved.q.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_constraints_is_not_an_error() {
        let mut graph = PoseGraph::new();
        graph.add_pose(0, Pose3d::identity()).unwrap();
        let far = Pose3d::new(Vec3::new(5.0, 0.0, 0.0), Quat::identity());
        graph.add_pose(1, far).unwrap();

        assert!(build_optimization_problem(&mut graph).unwrap().is_none());
        assert!(optimize_pose_graph(&mut graph, &PoseGraphConfig::default())
            .unwrap()
            .is_none());
        assert_eq!(graph.pose(1), Some(&far));
    }

    #[test]
    fn test_negative_information_aborts_build() {
        let mut graph = PoseGraph::new();
        graph.add_pose(0, Pose3d::identity()).unwrap();
        graph.add_pose(1, Pose3d::identity()).unwrap();
        let mut information = Matrix6::identity();
        information[(0, 0)] = -1.0;
        graph
            .add_constraint(Constraint3d::new(0, 1, Pose3d::identity(), information))
            .unwrap();

        assert!(matches!(
            build_optimization_problem(&mut graph),
            Err(PoseGraphError::NotPositiveDefinite { id_begin: 0, id_end: 1 })
        ));
    }

    #[test]
    fn test_blocks_and_gauge() {
        let mut graph = square_graph();
        // A pose without constraints gets no blocks and cannot be the anchor
        graph.add_pose(-5, Pose3d::identity()).unwrap();

        let problem = build_optimization_problem(&mut graph).unwrap().unwrap();
        assert_eq!(problem.anchor(), 0);
        assert_eq!(problem.num_poses(), 4);
        assert!(problem.pose_blocks(-5).is_none());

        let inner = problem.problem();
        assert_eq!(inner.num_residual_blocks(), 4);
        assert_eq!(inner.num_parameter_blocks(), 8);
        assert_eq!(inner.num_constant_parameter_blocks(), 2);
        assert_eq!(inner.num_effective_parameters(), 18);

        let anchor = problem.pose_blocks(0).unwrap();
        assert!(inner.is_parameter_block_constant(anchor.position).unwrap());
        assert!(inner.is_parameter_block_constant(anchor.orientation).unwrap());
    }

    #[test]
    fn test_square_loop_reduces_cost() {
        let mut graph = square_graph();
        let report = optimize_pose_graph(&mut graph, &PoseGraphConfig::default())
            .unwrap()
            .unwrap();

        assert!(report.usable);
        assert!(report.summary.final_cost < report.summary.initial_cost);
        for pose in graph.poses().values() {
            assert_abs_diff_eq!(pose.q.norm(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(graph.pose(0), Some(&Pose3d::identity()));
    }

    fn tight_config() -> PoseGraphConfig {
        PoseGraphConfig::default().with_tolerances(1e-14, 1e-14, 1e-14)
    }

    #[test]
    fn test_gauge_invariance() {
        let config = tight_config();

        let mut graph = square_graph();
        let first = optimize_pose_graph(&mut graph, &config).unwrap().unwrap();

        let rigid = Pose3d::from_axis_angle(Vec3::new(3.0, -7.0, 1.5), Vec3::new(0.4, -1.1, 0.8));
        graph.transform(&rigid);
        let second = optimize_pose_graph(&mut graph, &config).unwrap().unwrap();

        assert_abs_diff_eq!(second.summary.initial_cost, first.summary.final_cost, epsilon = 1e-8);
        assert_abs_diff_eq!(second.summary.final_cost, first.summary.final_cost, epsilon = 1e-8);
    }

    #[test]
    fn test_sparse_and_dense_backends_agree() {
        let mut sparse_graph = square_graph();
        let mut dense_graph = square_graph();

        let sparse = optimize_pose_graph(&mut sparse_graph, &tight_config())
            .unwrap()
            .unwrap();
        let dense_config = tight_config().with_linear_solver(LinearSolverType::DenseNormalCholesky);
        let dense = optimize_pose_graph(&mut dense_graph, &dense_config)
            .unwrap()
            .unwrap();

        assert_abs_diff_eq!(sparse.summary.final_cost, dense.summary.final_cost, epsilon = 1e-8);
        for (id, pose) in sparse_graph.poses() {
            let other = dense_graph.pose(*id).unwrap();
            assert_abs_diff_eq!(pose.p.x, other.p.x, epsilon = 1e-6);
            assert_abs_diff_eq!(pose.p.y, other.p.y, epsilon = 1e-6);
            assert_abs_diff_eq!(pose.p.z, other.p.z, epsilon = 1e-6);
        }
    }
}
