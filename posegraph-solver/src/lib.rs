//! posegraph-solver: sparse nonlinear least squares with forward-mode autodiff
//!
//! Parameter blocks, optionally constrained to a manifold or held constant,
//! are tied together by residual blocks. Jacobians come from [`Jet`]-based
//! automatic differentiation and are chained into each block's tangent space
//! before a Levenberg-Marquardt step is taken.

pub mod cost_function;
mod jet;
pub mod loss;
pub mod manifold;
pub mod math3d;
pub mod problem;
pub mod solver;
pub mod sparse_solver;

pub use cost_function::{AutoDiffCostFunction, AutoDiffResidual, CostFunction};
pub use jet::{Jet, Real};
pub use loss::{HuberLoss, LossFunction};
pub use manifold::{EuclideanManifold, Manifold, QuaternionManifold};
pub use problem::{ParameterBlockId, Problem, ProblemError, ResidualBlockId};
pub use solver::{
    IterationSummary, LevenbergMarquardt, LinearSolverType, Solver, SolverOptions, Summary,
    TerminationType,
};

// Re-export nalgebra for convenience
pub use nalgebra;
