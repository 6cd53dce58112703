//! Noise and prior distributions
//!
//! Filters are parameterized by distributions through the [`Density`] trait:
//! sampling through an explicit generator plus log-density evaluation. All
//! built-in families are immutable value types and may be shared read-only
//! across threads.
//!
//! - [`Gaussian`]: univariate normal
//! - [`MvGaussian`]: multivariate normal with full covariance
//! - [`DiagGaussian`]: multivariate normal with diagonal covariance
//! - [`Categorical`]: discrete distribution over `0..k`
//! - [`TupleProduct`]: heterogeneous product of univariate components

mod categorical;
mod gaussian;
mod product;

pub use categorical::Categorical;
pub use gaussian::{DiagGaussian, Gaussian, MvGaussian};
pub use product::TupleProduct;

use rand::RngCore;

/// Sampling and log-density over a value type.
///
/// `logpdf` returns `-inf` for impossible values and must never return NaN
/// for values in the support.
pub trait Density {
    /// The sampled value type.
    type Value;

    /// Dimension of the value (1 for scalar families).
    fn dim(&self) -> usize {
        1
    }

    /// Draw one sample using the supplied generator.
    fn sample(&self, rng: &mut dyn RngCore) -> Self::Value;

    /// Log-density at `x`.
    fn logpdf(&self, x: &Self::Value) -> f64;
}

/// Scalar-valued density usable as a [`TupleProduct`] component.
///
/// Discrete families participate with their support embedded in `f64`.
pub trait UnivariateDensity {
    /// Draw one scalar sample.
    fn sample_scalar(&self, rng: &mut dyn RngCore) -> f64;

    /// Log-density (or log-mass) at `x`.
    fn logpdf_scalar(&self, x: f64) -> f64;
}
