//! Robust loss functions applied to the squared norm of a residual block

use std::fmt::Debug;

pub trait LossFunction: Debug + Send + Sync {
    /// Returns `[ρ(s), ρ'(s)]` for the squared residual norm `s`
    fn evaluate(&self, squared_norm: f64) -> [f64; 2];
}

/// Huber loss: quadratic inside `delta`, linear outside
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuberLoss {
    delta: f64,
}

impl HuberLoss {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }
}

impl LossFunction for HuberLoss {
    fn evaluate(&self, squared_norm: f64) -> [f64; 2] {
        let b = self.delta * self.delta;
        if squared_norm <= b {
            [squared_norm, 1.0]
        } else {
            let r = squared_norm.sqrt();
            [2.0 * self.delta * r - b, self.delta / r]
        }
    }
}
