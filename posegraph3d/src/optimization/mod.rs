//! Pose-graph optimization
//!
//! [`error_term`] holds the per-constraint residual, [`pose_graph`] builds the
//! least-squares problem from a [`PoseGraph`](crate::graph::PoseGraph) and
//! drives the solver.

use posegraph_solver::{LevenbergMarquardt, LinearSolverType, SolverOptions};

pub mod error_term;
pub mod pose_graph;

pub use error_term::{relative_pose_error, PoseGraph3dErrorTerm};
pub use pose_graph::{
    build_optimization_problem, optimize_pose_graph, solve_optimization_problem, PoseBlocks,
    PoseGraphProblem, SolveReport,
};

/// Configuration for pose-graph optimization
#[derive(Debug, Clone)]
pub struct PoseGraphConfig {
    /// Maximum solver iterations
    pub max_iterations: usize,
    pub linear_solver: LinearSolverType,
    /// Relative cost decrease below which the solve stops
    pub function_tolerance: f64,
    pub gradient_tolerance: f64,
    pub parameter_tolerance: f64,
}

impl Default for PoseGraphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            linear_solver: LinearSolverType::SparseNormalCholesky,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
        }
    }
}

impl PoseGraphConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_linear_solver(mut self, linear_solver: LinearSolverType) -> Self {
        self.linear_solver = linear_solver;
        self
    }

    pub fn with_tolerances(mut self, function: f64, gradient: f64, parameter: f64) -> Self {
        self.function_tolerance = function;
        self.gradient_tolerance = gradient;
        self.parameter_tolerance = parameter;
        self
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions::default()
            .with_max_iterations(self.max_iterations)
            .with_linear_solver(self.linear_solver)
            .with_tolerances(
                self.function_tolerance,
                self.gradient_tolerance,
                self.parameter_tolerance,
            )
    }

    pub fn solver(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::new(self.solver_options())
    }
}
