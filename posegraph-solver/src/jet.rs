//! Dual number (Jet) type for forward-mode automatic differentiation
//!
//! A `Jet<N>` carries a value together with its partial derivatives with
//! respect to `N` parameters. Residuals written against the [`Real`] trait run
//! unchanged on plain `f64` (cost evaluation) and on jets (cost plus Jacobian).

use num_traits::{One, Zero};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A dual number containing a value and its derivatives
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jet<const N: usize> {
    /// The scalar value
    pub value: f64,
    /// Derivatives with respect to each parameter
    pub derivs: [f64; N],
}

impl<const N: usize> Jet<N> {
    /// Create a constant (zero derivatives)
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            derivs: [0.0; N],
        }
    }

    /// Create a variable with unit derivative at the given index
    pub fn variable(value: f64, index: usize) -> Self {
        let mut derivs = [0.0; N];
        derivs[index] = 1.0;
        Self { value, derivs }
    }

    /// True when the value and every derivative are finite
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.derivs.iter().all(|d| d.is_finite())
    }

    fn chain(self, value: f64, factor: f64) -> Self {
        Self {
            value,
            derivs: std::array::from_fn(|i| factor * self.derivs[i]),
        }
    }
}

/// Addition: (a + da) + (b + db) = (a + b) + (da + db)
impl<const N: usize> Add for Jet<N> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
            derivs: std::array::from_fn(|i| self.derivs[i] + rhs.derivs[i]),
        }
    }
}

/// Subtraction: (a + da) - (b + db) = (a - b) + (da - db)
impl<const N: usize> Sub for Jet<N> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
            derivs: std::array::from_fn(|i| self.derivs[i] - rhs.derivs[i]),
        }
    }
}

/// Multiplication: (a + da) * (b + db) = ab + a*db + b*da
impl<const N: usize> Mul for Jet<N> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            value: self.value * rhs.value,
            derivs: std::array::from_fn(|i| {
                self.value * rhs.derivs[i] + rhs.value * self.derivs[i]
            }),
        }
    }
}

/// Scaling by a plain scalar
impl<const N: usize> Mul<f64> for Jet<N> {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        self.chain(self.value * rhs, rhs)
    }
}

/// Division: (a + da) / (b + db) = a/b + (da*b - a*db)/b²
impl<const N: usize> Div for Jet<N> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let b_squared = rhs.value * rhs.value;
        Self {
            value: self.value / rhs.value,
            derivs: std::array::from_fn(|i| {
                (self.derivs[i] * rhs.value - self.value * rhs.derivs[i]) / b_squared
            }),
        }
    }
}

impl<const N: usize> Neg for Jet<N> {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            value: -self.value,
            derivs: std::array::from_fn(|i| -self.derivs[i]),
        }
    }
}

impl<const N: usize> Zero for Jet<N> {
    fn zero() -> Self {
        Self::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.derivs.iter().all(|d| *d == 0.0)
    }
}

impl<const N: usize> One for Jet<N> {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl<const N: usize> Jet<N> {
    /// Sine: sin(a + da) = sin(a) + cos(a) * da
    pub fn sin(self) -> Self {
        self.chain(self.value.sin(), self.value.cos())
    }

    /// Cosine: cos(a + da) = cos(a) - sin(a) * da
    pub fn cos(self) -> Self {
        self.chain(self.value.cos(), -self.value.sin())
    }

    /// Square root. The derivative at zero is infinite; callers that can hit
    /// zero must branch on [`Real::value`] first.
    pub fn sqrt(self) -> Self {
        let sqrt_a = self.value.sqrt();
        self.chain(sqrt_a, 0.5 / sqrt_a)
    }
}

/// Trait for types that support real number operations
///
/// Implemented for both f64 and `Jet<N>`, allowing generic code that works
/// with or without automatic differentiation.
pub trait Real:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Zero
    + One
    + Sized
{
    /// Lift a plain scalar into this type (zero derivatives for jets)
    fn from_f64(value: f64) -> Self;

    /// The scalar part, used for branching on magnitudes
    fn value(&self) -> f64;

    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn sqrt(self) -> Self;
}

impl Real for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
    fn value(&self) -> f64 {
        *self
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

impl<const N: usize> Real for Jet<N> {
    fn from_f64(value: f64) -> Self {
        Jet::constant(value)
    }
    fn value(&self) -> f64 {
        self.value
    }
    fn sin(self) -> Self {
        Jet::sin(self)
    }
    fn cos(self) -> Self {
        Jet::cos(self)
    }
    fn sqrt(self) -> Self {
        Jet::sqrt(self)
    }
}
