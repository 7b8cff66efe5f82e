//! Posegraph3d: 3-D pose-graph optimization
//!
//! Poses are linked by noisy relative-pose measurements. The graph is turned
//! into a nonlinear least-squares problem over position and unit-quaternion
//! blocks and solved with the Levenberg-Marquardt solver from
//! posegraph-solver, using forward-mode automatic differentiation for the
//! Jacobians.

pub mod error;
pub mod graph;
pub mod io;
pub mod optimization;
pub mod pose;
pub mod simulation;

// Re-export key types
pub use error::{PoseGraphError, Result};
pub use graph::PoseGraph;
pub use optimization::{
    build_optimization_problem, optimize_pose_graph, solve_optimization_problem, PoseGraph3dErrorTerm,
    PoseGraphConfig, PoseGraphProblem, SolveReport,
};
pub use pose::{Constraint3d, Pose3d, VertexId};
pub use posegraph_solver;
