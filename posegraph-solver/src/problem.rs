//! Nonlinear least-squares problem definition
//!
//! A `Problem` owns parameter blocks (flat `f64` arrays, optionally on a
//! manifold, optionally held constant) and residual blocks (a cost function,
//! an optional loss, and the parameter blocks it reads).

use crate::cost_function::CostFunction;
use crate::loss::LossFunction;
use crate::manifold::Manifold;
use nalgebra::DMatrix;
use std::sync::Arc;
use thiserror::Error;

/// Handle to a parameter block, valid for the problem that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterBlockId(usize);

impl ParameterBlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a residual block, valid for the problem that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResidualBlockId(usize);

impl ResidualBlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Errors raised when a problem is assembled or evaluated inconsistently
#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("unknown parameter block {0:?}")]
    UnknownParameterBlock(ParameterBlockId),
    #[error("cost function expects {expected} parameter blocks, got {actual}")]
    ParameterBlockCount { expected: usize, actual: usize },
    #[error("parameter block {block:?} has size {actual}, cost function expects {expected}")]
    ParameterBlockSize {
        block: ParameterBlockId,
        expected: usize,
        actual: usize,
    },
    #[error("parameter block {0:?} appears more than once in one residual block")]
    DuplicateParameterBlock(ParameterBlockId),
    #[error("manifold ambient size {manifold} does not match parameter block {block:?} of size {actual}")]
    ManifoldSize {
        block: ParameterBlockId,
        manifold: usize,
        actual: usize,
    },
    #[error("residual block {0:?} could not be evaluated")]
    EvaluationFailed(ResidualBlockId),
}

pub(crate) struct ParameterBlock {
    pub(crate) values: Vec<f64>,
    pub(crate) manifold: Option<Arc<dyn Manifold>>,
    pub(crate) constant: bool,
}

impl ParameterBlock {
    pub(crate) fn tangent_size(&self) -> usize {
        self.manifold
            .as_ref()
            .map_or(self.values.len(), |m| m.tangent_size())
    }

    /// Retract `delta` (tangent coordinates) onto `x`
    pub(crate) fn plus(&self, x: &[f64], delta: &[f64], x_plus_delta: &mut [f64]) {
        match &self.manifold {
            Some(manifold) => manifold.plus(x, delta, x_plus_delta),
            None => {
                for ((out, xi), di) in x_plus_delta.iter_mut().zip(x).zip(delta) {
                    *out = xi + di;
                }
            }
        }
    }
}

pub(crate) struct ResidualBlock {
    pub(crate) cost: Box<dyn CostFunction>,
    pub(crate) loss: Option<Box<dyn LossFunction>>,
    pub(crate) parameter_blocks: Vec<ParameterBlockId>,
}

impl ResidualBlock {
    pub(crate) fn num_residuals(&self) -> usize {
        self.cost.num_residuals()
    }

    /// Evaluate at `state` and return this block's cost `0.5 * ρ(‖r‖²)`.
    ///
    /// With a loss attached, residuals and Jacobians come back scaled by
    /// `sqrt(ρ')`. Returns `None` if the cost function fails or produces
    /// non-finite output.
    pub(crate) fn evaluate(
        &self,
        state: &[Vec<f64>],
        residuals: &mut [f64],
        mut jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> Option<f64> {
        let parameters: Vec<&[f64]> = self
            .parameter_blocks
            .iter()
            .map(|id| state[id.0].as_slice())
            .collect();

        if !self
            .cost
            .evaluate(&parameters, residuals, jacobians.as_deref_mut())
        {
            return None;
        }
        if !residuals.iter().all(|r| r.is_finite()) {
            return None;
        }
        if let Some(jacobians) = jacobians.as_deref() {
            if !jacobians.iter().all(|j| j.iter().all(|v| v.is_finite())) {
                return None;
            }
        }

        let squared_norm: f64 = residuals.iter().map(|r| r * r).sum();
        let Some(loss) = &self.loss else {
            return Some(0.5 * squared_norm);
        };

        let [rho, rho_prime] = loss.evaluate(squared_norm);
        let weight = rho_prime.sqrt();
        residuals.iter_mut().for_each(|r| *r *= weight);
        if let Some(jacobians) = jacobians {
            for jacobian in jacobians.iter_mut() {
                *jacobian *= weight;
            }
        }
        Some(0.5 * rho)
    }
}

/// Container for parameter blocks and residual blocks
#[derive(Default)]
pub struct Problem {
    pub(crate) parameter_blocks: Vec<ParameterBlock>,
    pub(crate) residual_blocks: Vec<ResidualBlock>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter block initialized with `values`
    pub fn add_parameter_block(&mut self, values: &[f64]) -> ParameterBlockId {
        self.parameter_blocks.push(ParameterBlock {
            values: values.to_vec(),
            manifold: None,
            constant: false,
        });
        ParameterBlockId(self.parameter_blocks.len() - 1)
    }

    /// Add a residual block over `blocks`, in the cost function's argument order
    ///
    /// # Errors
    ///
    /// Fails if a block is unknown, if the block count or any block size
    /// disagrees with the cost function, or if a block is listed twice.
    pub fn add_residual_block(
        &mut self,
        cost: Box<dyn CostFunction>,
        loss: Option<Box<dyn LossFunction>>,
        blocks: &[ParameterBlockId],
    ) -> Result<ResidualBlockId, ProblemError> {
        let sizes = cost.parameter_block_sizes();
        if sizes.len() != blocks.len() {
            return Err(ProblemError::ParameterBlockCount {
                expected: sizes.len(),
                actual: blocks.len(),
            });
        }

        for (i, (&id, &expected)) in blocks.iter().zip(sizes).enumerate() {
            let actual = self.block(id)?.values.len();
            if actual != expected {
                return Err(ProblemError::ParameterBlockSize {
                    block: id,
                    expected,
                    actual,
                });
            }
            if blocks[..i].contains(&id) {
                return Err(ProblemError::DuplicateParameterBlock(id));
            }
        }

        self.residual_blocks.push(ResidualBlock {
            cost,
            loss,
            parameter_blocks: blocks.to_vec(),
        });
        Ok(ResidualBlockId(self.residual_blocks.len() - 1))
    }

    /// Attach a manifold; its ambient size must equal the block size
    pub fn set_manifold(
        &mut self,
        id: ParameterBlockId,
        manifold: Arc<dyn Manifold>,
    ) -> Result<(), ProblemError> {
        let block = self.block_mut(id)?;
        if manifold.ambient_size() != block.values.len() {
            return Err(ProblemError::ManifoldSize {
                block: id,
                manifold: manifold.ambient_size(),
                actual: block.values.len(),
            });
        }
        block.manifold = Some(manifold);
        Ok(())
    }

    pub fn set_parameter_block_constant(&mut self, id: ParameterBlockId) -> Result<(), ProblemError> {
        self.block_mut(id)?.constant = true;
        Ok(())
    }

    pub fn set_parameter_block_variable(&mut self, id: ParameterBlockId) -> Result<(), ProblemError> {
        self.block_mut(id)?.constant = false;
        Ok(())
    }

    pub fn is_parameter_block_constant(&self, id: ParameterBlockId) -> Result<bool, ProblemError> {
        Ok(self.block(id)?.constant)
    }

    /// Current values of a parameter block
    pub fn parameter_block(&self, id: ParameterBlockId) -> Result<&[f64], ProblemError> {
        Ok(&self.block(id)?.values)
    }

    pub fn num_parameter_blocks(&self) -> usize {
        self.parameter_blocks.len()
    }

    pub fn num_constant_parameter_blocks(&self) -> usize {
        self.parameter_blocks.iter().filter(|b| b.constant).count()
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    /// Total ambient size of all parameter blocks
    pub fn num_parameters(&self) -> usize {
        self.parameter_blocks.iter().map(|b| b.values.len()).sum()
    }

    /// Tangent size of the blocks the solver is allowed to move
    pub fn num_effective_parameters(&self) -> usize {
        self.parameter_blocks
            .iter()
            .filter(|b| !b.constant)
            .map(ParameterBlock::tangent_size)
            .sum()
    }

    pub fn num_residuals(&self) -> usize {
        self.residual_blocks.iter().map(ResidualBlock::num_residuals).sum()
    }

    /// Total cost `Σ 0.5 * ρ(‖r_i‖²)` at the current parameter values
    pub fn evaluate_cost(&self) -> Result<f64, ProblemError> {
        let state = self.state();
        let mut cost = 0.0;
        for (index, block) in self.residual_blocks.iter().enumerate() {
            let mut residuals = vec![0.0; block.num_residuals()];
            cost += block
                .evaluate(&state, &mut residuals, None)
                .ok_or(ProblemError::EvaluationFailed(ResidualBlockId(index)))?;
        }
        Ok(cost)
    }

    /// Stacked residuals of every block in insertion order
    pub fn evaluate_residuals(&self) -> Result<Vec<f64>, ProblemError> {
        let state = self.state();
        let mut stacked = Vec::with_capacity(self.num_residuals());
        for (index, block) in self.residual_blocks.iter().enumerate() {
            let mut residuals = vec![0.0; block.num_residuals()];
            block
                .evaluate(&state, &mut residuals, None)
                .ok_or(ProblemError::EvaluationFailed(ResidualBlockId(index)))?;
            stacked.extend_from_slice(&residuals);
        }
        Ok(stacked)
    }

    /// Copy of every parameter block's values, indexed by block
    pub(crate) fn state(&self) -> Vec<Vec<f64>> {
        self.parameter_blocks.iter().map(|b| b.values.clone()).collect()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Vec<f64>>) {
        for (block, values) in self.parameter_blocks.iter_mut().zip(state) {
            block.values = values;
        }
    }

    fn block(&self, id: ParameterBlockId) -> Result<&ParameterBlock, ProblemError> {
        self.parameter_blocks
            .get(id.0)
            .ok_or(ProblemError::UnknownParameterBlock(id))
    }

    fn block_mut(&mut self, id: ParameterBlockId) -> Result<&mut ParameterBlock, ProblemError> {
        self.parameter_blocks
            .get_mut(id.0)
            .ok_or(ProblemError::UnknownParameterBlock(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost_function::{AutoDiffCostFunction, AutoDiffResidual};
    use crate::loss::HuberLoss;
    use crate::manifold::QuaternionManifold;
    use crate::Real;
    use approx::assert_abs_diff_eq;

    /// r = x - target
    struct Offset {
        target: [f64; 2],
    }

    impl AutoDiffResidual for Offset {
        fn num_residuals(&self) -> usize {
            2
        }

        fn parameter_block_sizes(&self) -> &[usize] {
            &[2]
        }

        fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool {
            for i in 0..2 {
                residuals[i] = parameters[0][i] - T::from_f64(self.target[i]);
            }
            true
        }
    }

    /// r = a - b
    struct Difference;

    impl AutoDiffResidual for Difference {
        fn num_residuals(&self) -> usize {
            1
        }

        fn parameter_block_sizes(&self) -> &[usize] {
            &[1, 1]
        }

        fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool {
            residuals[0] = parameters[0][0] - parameters[1][0];
            true
        }
    }

    fn offset(target: [f64; 2]) -> Box<dyn CostFunction> {
        Box::new(AutoDiffCostFunction::<_, 2>::new(Offset { target }))
    }

    #[test]
    fn test_evaluate_cost() {
        let mut problem = Problem::new();
        let x = problem.add_parameter_block(&[1.0, 2.0]);
        problem.add_residual_block(offset([0.0, 0.0]), None, &[x]).unwrap();

        assert_abs_diff_eq!(problem.evaluate_cost().unwrap(), 2.5, epsilon = 1e-15);
        assert_eq!(problem.evaluate_residuals().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_huber_loss_caps_cost() {
        let mut problem = Problem::new();
        let x = problem.add_parameter_block(&[3.0, 4.0]);
        problem
            .add_residual_block(offset([0.0, 0.0]), Some(Box::new(HuberLoss::new(1.0))), &[x])
            .unwrap();

        // ρ(25) = 2 * 1 * 5 - 1 = 9
        assert_abs_diff_eq!(problem.evaluate_cost().unwrap(), 4.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_wrong_block_size() {
        let mut problem = Problem::new();
        let x = problem.add_parameter_block(&[1.0, 2.0, 3.0]);
        let err = problem.add_residual_block(offset([0.0, 0.0]), None, &[x]);
        assert!(matches!(
            err,
            Err(ProblemError::ParameterBlockSize { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_block_count() {
        let mut problem = Problem::new();
        let x = problem.add_parameter_block(&[1.0, 2.0]);
        let err = problem.add_residual_block(offset([0.0, 0.0]), None, &[x, x]);
        assert!(matches!(
            err,
            Err(ProblemError::ParameterBlockCount { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_rejects_duplicate_block() {
        let mut problem = Problem::new();
        let a = problem.add_parameter_block(&[1.0]);
        let cost = Box::new(AutoDiffCostFunction::<_, 2>::new(Difference));
        let err = problem.add_residual_block(cost, None, &[a, a]);
        assert!(matches!(err, Err(ProblemError::DuplicateParameterBlock(id)) if id == a));
    }

    #[test]
    fn test_manifold_size_must_match() {
        let mut problem = Problem::new();
        let x = problem.add_parameter_block(&[1.0, 2.0, 3.0]);
        let err = problem.set_manifold(x, Arc::new(QuaternionManifold));
        assert!(matches!(
            err,
            Err(ProblemError::ManifoldSize { manifold: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_effective_parameters() {
        let mut problem = Problem::new();
        let p = problem.add_parameter_block(&[0.0, 0.0, 0.0]);
        let q = problem.add_parameter_block(&[0.0, 0.0, 0.0, 1.0]);
        let fixed = problem.add_parameter_block(&[0.0, 0.0, 0.0]);
        problem.set_manifold(q, Arc::new(QuaternionManifold)).unwrap();
        problem.set_parameter_block_constant(fixed).unwrap();

        assert_eq!(problem.num_parameters(), 10);
        assert_eq!(problem.num_effective_parameters(), 6);
        assert_eq!(problem.num_constant_parameter_blocks(), 1);
        assert!(problem.is_parameter_block_constant(fixed).unwrap());
        assert!(!problem.is_parameter_block_constant(p).unwrap());

        problem.set_parameter_block_variable(fixed).unwrap();
        assert_eq!(problem.num_effective_parameters(), 9);
    }

    #[test]
    fn test_unknown_block() {
        let problem = Problem::new();
        let mut other = Problem::new();
        let id = other.add_parameter_block(&[0.0]);
        assert!(matches!(
            problem.parameter_block(id),
            Err(ProblemError::UnknownParameterBlock(_))
        ));
    }
}
