//! Residual blocks as seen by the solver
//!
//! A [`CostFunction`] maps a fixed set of parameter blocks to a residual
//! vector and, on request, the Jacobian of that vector with respect to each
//! block in ambient coordinates. [`AutoDiffCostFunction`] builds one from a
//! residual written generically over [`Real`], seeding `Jet<N>` variables for
//! every ambient parameter.

use crate::{Jet, Real};
use nalgebra::DMatrix;

pub trait CostFunction: Send + Sync {
    fn num_residuals(&self) -> usize;

    /// Ambient size of each parameter block, in argument order
    fn parameter_block_sizes(&self) -> &[usize];

    /// Evaluate residuals and, when `jacobians` is given, one
    /// `num_residuals × block_size` matrix per parameter block.
    ///
    /// Returns false when the residual cannot be computed at these values.
    fn evaluate(
        &self,
        parameters: &[&[f64]],
        residuals: &mut [f64],
        jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> bool;
}

/// A residual written once for both `f64` and jets
pub trait AutoDiffResidual: Send + Sync {
    fn num_residuals(&self) -> usize;

    fn parameter_block_sizes(&self) -> &[usize];

    fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool;
}

/// Forward-mode autodiff wrapper. `N` must equal the total ambient size of
/// all parameter blocks.
#[derive(Debug, Clone)]
pub struct AutoDiffCostFunction<F, const N: usize> {
    functor: F,
}

impl<F: AutoDiffResidual, const N: usize> AutoDiffCostFunction<F, N> {
    pub fn new(functor: F) -> Self {
        let total: usize = functor.parameter_block_sizes().iter().sum();
        assert_eq!(
            total, N,
            "jet size {} does not match total parameter size {}",
            N, total
        );
        Self { functor }
    }

    pub fn functor(&self) -> &F {
        &self.functor
    }
}

impl<F: AutoDiffResidual, const N: usize> CostFunction for AutoDiffCostFunction<F, N> {
    fn num_residuals(&self) -> usize {
        self.functor.num_residuals()
    }

    fn parameter_block_sizes(&self) -> &[usize] {
        self.functor.parameter_block_sizes()
    }

    fn evaluate(
        &self,
        parameters: &[&[f64]],
        residuals: &mut [f64],
        jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> bool {
        let Some(jacobians) = jacobians else {
            return self.functor.residuals(parameters, residuals);
        };

        // Each ambient parameter gets its own derivative slot
        let mut deriv_offset = 0;
        let jet_blocks: Vec<Vec<Jet<N>>> = parameters
            .iter()
            .map(|block| {
                let jets: Vec<Jet<N>> = block
                    .iter()
                    .enumerate()
                    .map(|(i, &value)| Jet::variable(value, deriv_offset + i))
                    .collect();
                deriv_offset += block.len();
                jets
            })
            .collect();
        let jet_refs: Vec<&[Jet<N>]> = jet_blocks.iter().map(Vec::as_slice).collect();

        let mut jet_residuals = vec![Jet::<N>::constant(0.0); residuals.len()];
        if !self.functor.residuals(&jet_refs, &mut jet_residuals) {
            return false;
        }

        for (out, jet) in residuals.iter_mut().zip(&jet_residuals) {
            *out = jet.value;
        }

        let mut col_offset = 0;
        for (jacobian, block) in jacobians.iter_mut().zip(parameters) {
            for (row, jet) in jet_residuals.iter().enumerate() {
                for col in 0..block.len() {
                    jacobian[(row, col)] = jet.derivs[col_offset + col];
                }
            }
            col_offset += block.len();
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// r = [a0 * b0 - 1, a1 + sin(b0)]
    struct Toy {
        sizes: [usize; 2],
    }

    impl AutoDiffResidual for Toy {
        fn num_residuals(&self) -> usize {
            2
        }

        fn parameter_block_sizes(&self) -> &[usize] {
            &self.sizes
        }

        fn residuals<T: Real>(&self, parameters: &[&[T]], residuals: &mut [T]) -> bool {
            let (a, b) = (parameters[0], parameters[1]);
            residuals[0] = a[0] * b[0] - T::one();
            residuals[1] = a[1] + b[0].sin();
            true
        }
    }

    #[test]
    fn test_autodiff_jacobians() {
        let cost = AutoDiffCostFunction::<_, 3>::new(Toy { sizes: [2, 1] });
        let a = [2.0, 3.0];
        let b = [0.5];

        let mut residuals = [0.0; 2];
        let mut jacobians = [DMatrix::zeros(2, 2), DMatrix::zeros(2, 1)];
        assert!(cost.evaluate(&[&a[..], &b[..]], &mut residuals, Some(&mut jacobians[..])));

        assert_abs_diff_eq!(residuals[0], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(residuals[1], 3.0 + 0.5_f64.sin(), epsilon = 1e-15);

        assert_eq!(jacobians[0][(0, 0)], 0.5);
        assert_eq!(jacobians[0][(0, 1)], 0.0);
        assert_eq!(jacobians[0][(1, 1)], 1.0);
        assert_eq!(jacobians[1][(0, 0)], 2.0);
        assert_abs_diff_eq!(jacobians[1][(1, 0)], 0.5_f64.cos(), epsilon = 1e-15);
    }

    #[test]
    fn test_residual_only_matches_jet_path() {
        let cost = AutoDiffCostFunction::<_, 3>::new(Toy { sizes: [2, 1] });
        let a = [1.5, -1.0];
        let b = [0.25];

        let mut plain = [0.0; 2];
        assert!(cost.evaluate(&[&a[..], &b[..]], &mut plain, None));

        let mut with_jacobian = [0.0; 2];
        let mut jacobians = [DMatrix::zeros(2, 2), DMatrix::zeros(2, 1)];
        assert!(cost.evaluate(&[&a[..], &b[..]], &mut with_jacobian, Some(&mut jacobians[..])));

        assert_eq!(plain, with_jacobian);
    }

    #[test]
    #[should_panic(expected = "jet size")]
    fn test_mismatched_jet_size_panics() {
        let _ = AutoDiffCostFunction::<_, 4>::new(Toy { sizes: [2, 1] });
    }
}
