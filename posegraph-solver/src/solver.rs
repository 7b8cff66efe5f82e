//! Levenberg-Marquardt solver over a [`Problem`]
//!
//! Steps are computed in the tangent space of the non-constant parameter
//! blocks and retracted through each block's manifold. The normal equations
//! `(JᵀJ + λ D) δ = Jᵀr` are solved either with sparse LDLᵀ (the default) or
//! with a dense Cholesky factorization.

use crate::problem::Problem;
use crate::sparse_solver::{add_damping, solve_ldl, JacobianEvaluator};
use nalgebra::{Cholesky, DMatrix, DVector};
use sprs::CsMat;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How the damped normal equations are solved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinearSolverType {
    #[default]
    SparseNormalCholesky,
    DenseNormalCholesky,
}

impl fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SparseNormalCholesky => write!(f, "SPARSE_NORMAL_CHOLESKY"),
            Self::DenseNormalCholesky => write!(f, "DENSE_NORMAL_CHOLESKY"),
        }
    }
}

/// Solver settings
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub max_num_iterations: usize,
    pub linear_solver_type: LinearSolverType,
    /// Stop when |Δcost| / cost falls below this after an accepted step
    pub function_tolerance: f64,
    /// Stop when max |Jᵀr| falls below this
    pub gradient_tolerance: f64,
    /// Stop when |δ| <= tol * (|x| + tol)
    pub parameter_tolerance: f64,
    pub initial_lambda: f64,
    pub lambda_scale_up: f64,
    pub lambda_scale_down: f64,
    pub min_lambda: f64,
    /// Terminate once damping grows past this
    pub max_lambda: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_num_iterations: 50,
            linear_solver_type: LinearSolverType::default(),
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
            initial_lambda: 1e-4,
            lambda_scale_up: 10.0,
            lambda_scale_down: 0.1,
            min_lambda: 1e-16,
            max_lambda: 1e16,
        }
    }
}

impl SolverOptions {
    pub fn with_max_iterations(mut self, max_num_iterations: usize) -> Self {
        self.max_num_iterations = max_num_iterations;
        self
    }

    pub fn with_linear_solver(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_tolerances(mut self, function: f64, gradient: f64, parameter: f64) -> Self {
        self.function_tolerance = function;
        self.gradient_tolerance = gradient;
        self.parameter_tolerance = parameter;
        self
    }

    pub fn with_lambda_params(mut self, initial: f64, scale_up: f64, scale_down: f64) -> Self {
        self.initial_lambda = initial;
        self.lambda_scale_up = scale_up;
        self.lambda_scale_down = scale_down;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationType {
    /// A tolerance was met
    Convergence,
    /// Iteration budget exhausted; the last accepted state is kept
    NoConvergence,
    /// Evaluation or linear algebra broke down
    Failure,
}

impl fmt::Display for TerminationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convergence => write!(f, "CONVERGENCE"),
            Self::NoConvergence => write!(f, "NO_CONVERGENCE"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// One row of the per-iteration log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationSummary {
    pub iteration: usize,
    pub cost: f64,
    pub cost_change: f64,
    pub gradient_max_norm: f64,
    pub step_norm: f64,
    pub lambda: f64,
    pub step_is_successful: bool,
}

/// Outcome of a solve
#[derive(Debug, Clone)]
pub struct Summary {
    pub termination_type: TerminationType,
    pub message: String,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: Vec<IterationSummary>,
    pub num_successful_steps: usize,
    pub num_unsuccessful_steps: usize,
    pub num_parameter_blocks: usize,
    pub num_constant_parameter_blocks: usize,
    pub num_parameters: usize,
    pub num_effective_parameters: usize,
    pub num_residual_blocks: usize,
    pub num_residuals: usize,
    pub linear_solver_type: LinearSolverType,
    pub total_time: Duration,
}

impl Summary {
    fn new(problem: &Problem, options: &SolverOptions) -> Self {
        Self {
            termination_type: TerminationType::Failure,
            message: String::new(),
            initial_cost: f64::NAN,
            final_cost: f64::NAN,
            iterations: Vec::new(),
            num_successful_steps: 0,
            num_unsuccessful_steps: 0,
            num_parameter_blocks: problem.num_parameter_blocks(),
            num_constant_parameter_blocks: problem.num_constant_parameter_blocks(),
            num_parameters: problem.num_parameters(),
            num_effective_parameters: problem.num_effective_parameters(),
            num_residual_blocks: problem.num_residual_blocks(),
            num_residuals: problem.num_residuals(),
            linear_solver_type: options.linear_solver_type,
            total_time: Duration::ZERO,
        }
    }

    /// True when the parameter values left in the problem can be used
    pub fn is_solution_usable(&self) -> bool {
        matches!(
            self.termination_type,
            TerminationType::Convergence | TerminationType::NoConvergence
        ) && self.final_cost.is_finite()
    }

    /// One-line report
    pub fn brief_report(&self) -> String {
        format!(
            "Levenberg-Marquardt: {} iterations, initial cost {:e}, final cost {:e}, termination: {}",
            self.iterations.len(),
            self.initial_cost,
            self.final_cost,
            self.termination_type
        )
    }

    /// Multi-line report with problem size, costs and termination reason
    pub fn full_report(&self) -> String {
        let mut report = String::from("\nSolver Summary\n\n");
        let mut line = |label: &str, value: String| {
            report.push_str(&format!("{:<32}{}\n", label, value));
        };

        line(
            "Parameter blocks",
            format!(
                "{} ({} constant)",
                self.num_parameter_blocks, self.num_constant_parameter_blocks
            ),
        );
        line("Parameters", self.num_parameters.to_string());
        line("Effective parameters", self.num_effective_parameters.to_string());
        line("Residual blocks", self.num_residual_blocks.to_string());
        line("Residuals", self.num_residuals.to_string());
        line("", String::new());
        line("Minimizer", "LEVENBERG_MARQUARDT".to_string());
        line("Linear solver", self.linear_solver_type.to_string());
        line("", String::new());
        line("Initial cost", format!("{:e}", self.initial_cost));
        line("Final cost", format!("{:e}", self.final_cost));
        line("Change", format!("{:e}", self.initial_cost - self.final_cost));
        line("", String::new());
        line("Minimizer iterations", self.iterations.len().to_string());
        line("Successful steps", self.num_successful_steps.to_string());
        line("Unsuccessful steps", self.num_unsuccessful_steps.to_string());
        line("", String::new());
        line("Total time (s)", format!("{:.6}", self.total_time.as_secs_f64()));
        line("", String::new());
        line(
            "Termination:",
            format!("{} ({})", self.termination_type, self.message),
        );
        report
    }

    fn finish(&mut self, termination_type: TerminationType, message: impl Into<String>) {
        self.termination_type = termination_type;
        self.message = message.into();
    }
}

/// Nonlinear least-squares minimizer
pub trait Solver {
    /// Minimize `problem` in place and report what happened.
    ///
    /// Parameter blocks are updated unless the solve ends in failure.
    fn solve(&self, problem: &mut Problem) -> Summary;
}

/// Levenberg-Marquardt with multiplicative damping updates
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    pub options: SolverOptions,
}

impl LevenbergMarquardt {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    fn solve_linear(&self, jtj: &CsMat<f64>, rhs: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
        match self.options.linear_solver_type {
            LinearSolverType::SparseNormalCholesky => solve_ldl(&add_damping(jtj, lambda), rhs),
            LinearSolverType::DenseNormalCholesky => solve_dense(jtj, rhs, lambda),
        }
    }
}

impl Solver for LevenbergMarquardt {
    fn solve(&self, problem: &mut Problem) -> Summary {
        let start = Instant::now();
        let options = &self.options;
        let mut summary = Summary::new(problem, options);

        let mut evaluator = JacobianEvaluator::new(problem);
        let mut state = problem.state();
        let mut residuals = DVector::zeros(evaluator.num_residuals());
        let mut trial_residuals = DVector::zeros(evaluator.num_residuals());

        let Some(mut cost) = evaluator.evaluate(problem, &state, &mut residuals, true) else {
            summary.finish(TerminationType::Failure, "Residual and Jacobian evaluation failed");
            summary.total_time = start.elapsed();
            return summary;
        };
        summary.initial_cost = cost;
        summary.final_cost = cost;

        if evaluator.num_columns() == 0 {
            summary.finish(
                TerminationType::Convergence,
                "No non-constant parameter blocks found",
            );
            summary.total_time = start.elapsed();
            return summary;
        }

        let mut lambda = options.initial_lambda;
        let mut gradient = evaluator.gradient(&residuals);
        let mut jtj = evaluator.normal_matrix();
        let mut termination = None;

        for iteration in 0..options.max_num_iterations {
            let gradient_max_norm = gradient.amax();
            if gradient_max_norm <= options.gradient_tolerance {
                termination = Some((
                    TerminationType::Convergence,
                    format!("Gradient tolerance reached: {:e} <= {:e}", gradient_max_norm, options.gradient_tolerance),
                ));
                break;
            }

            let Some(delta) = self.solve_linear(&jtj, &gradient, lambda) else {
                warn!("linear solve failed at iteration {} (lambda={:e})", iteration, lambda);
                summary.num_unsuccessful_steps += 1;
                lambda *= options.lambda_scale_up;
                if lambda > options.max_lambda {
                    termination = Some((TerminationType::Failure, "Linear solver failed".to_string()));
                    break;
                }
                continue;
            };

            let step = -delta;
            let step_norm = step.norm();
            let state_norm = evaluator.state_norm(&state);
            if step_norm <= options.parameter_tolerance * (state_norm + options.parameter_tolerance) {
                termination = Some((
                    TerminationType::Convergence,
                    format!("Parameter tolerance reached: |step| = {:e}", step_norm),
                ));
                break;
            }

            let candidate = evaluator.plus(problem, &state, &step);
            let new_cost = evaluator
                .evaluate(problem, &candidate, &mut trial_residuals, false)
                .filter(|c| c.is_finite());

            match new_cost {
                Some(new_cost) if new_cost < cost => {
                    let cost_change = cost - new_cost;
                    let previous_cost = cost;
                    state = candidate;

                    let Some(refreshed) = evaluator.evaluate(problem, &state, &mut residuals, true) else {
                        termination = Some((
                            TerminationType::Failure,
                            "Residual and Jacobian evaluation failed".to_string(),
                        ));
                        break;
                    };
                    cost = refreshed;
                    gradient = evaluator.gradient(&residuals);
                    jtj = evaluator.normal_matrix();
                    lambda = (lambda * options.lambda_scale_down).max(options.min_lambda);
                    summary.num_successful_steps += 1;
                    summary.final_cost = cost;

                    let record = IterationSummary {
                        iteration,
                        cost,
                        cost_change,
                        gradient_max_norm,
                        step_norm,
                        lambda,
                        step_is_successful: true,
                    };
                    debug!(?record, "accepted step");
                    summary.iterations.push(record);

                    if cost_change <= options.function_tolerance * previous_cost {
                        termination = Some((
                            TerminationType::Convergence,
                            format!(
                                "Function tolerance reached: |cost_change|/cost = {:e} <= {:e}",
                                cost_change / previous_cost,
                                options.function_tolerance
                            ),
                        ));
                        break;
                    }
                }
                _ => {
                    lambda *= options.lambda_scale_up;
                    summary.num_unsuccessful_steps += 1;

                    let record = IterationSummary {
                        iteration,
                        cost,
                        cost_change: 0.0,
                        gradient_max_norm,
                        step_norm,
                        lambda,
                        step_is_successful: false,
                    };
                    debug!(?record, "rejected step");
                    summary.iterations.push(record);

                    if lambda > options.max_lambda {
                        termination = Some((
                            TerminationType::Convergence,
                            format!("Damping exceeded {:e}; no further decrease possible", options.max_lambda),
                        ));
                        break;
                    }
                }
            }
        }

        let (termination_type, message) = termination.unwrap_or_else(|| {
            (
                TerminationType::NoConvergence,
                format!("Maximum number of iterations reached: {}", options.max_num_iterations),
            )
        });
        summary.finish(termination_type, message);

        if termination_type != TerminationType::Failure {
            problem.set_state(state);
        }
        summary.total_time = start.elapsed();
        summary
    }
}

/// Dense Cholesky solve of the damped normal equations
fn solve_dense(jtj: &CsMat<f64>, rhs: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let n = rhs.len();
    let mut dense = DMatrix::zeros(n, n);
    for (outer, values) in jtj.outer_iterator().enumerate() {
        for (inner, &value) in values.iter() {
            dense[(inner, outer)] = value;
        }
    }
    for i in 0..n {
        let d = dense[(i, i)];
        dense[(i, i)] = d + lambda * d.max(1.0);
    }

    let x = Cholesky::new(dense)?.solve(rhs);
    x.iter().all(|v| v.is_finite()).then_some(x)
}
