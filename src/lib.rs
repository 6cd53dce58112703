/*!
# Sequor - state estimation for discrete-time stochastic systems

Rust implementation of sequential Monte Carlo and Gaussian state estimators
with forward-backward smoothing and likelihood-based parameter inference.

## Features

- Particle filters: bootstrap, auxiliary (lookahead), and an advanced
  variant for state-dependent noise and non-additive measurement models
- Gaussian filters: Kalman (with time-varying coefficients) and unscented
- Smoothers: forward-filter/backward-simulate and Rauch-Tung-Striebel
- Inference: likelihood functions over parameters and particle marginal
  Metropolis-Hastings

## Modules

- [`filter`] - the estimators and the shared [`Filter`] capability set
- [`distribution`] - noise and prior distributions
- [`trajectory`] - simulation and forward-pass drivers
- [`smooth`] - fixed-interval smoothers
- [`inference`] - likelihood construction and Metropolis sampling
- [`weights`], [`resample`], [`rng`] - the particle machinery underneath

## Example

```rust
use nalgebra::DVector;
use sequor::distribution::DiagGaussian;
use sequor::filter::{Filter, FilterConfig, ParticleFilter};
use sequor::trajectory::forward_trajectory;

// Scalar random walk observed in noise.
let dynamics = |x: &DVector<f64>, u: &DVector<f64>, _t: usize| x * 0.95 + u;
let measurement = |x: &DVector<f64>, _u: &DVector<f64>, _t: usize| x.clone();

let mut pf = ParticleFilter::new(
    1000,
    dynamics,
    measurement,
    DiagGaussian::isotropic(1, 0.5).unwrap(),
    DiagGaussian::isotropic(1, 1.0).unwrap(),
    DiagGaussian::isotropic(1, 2.0).unwrap(),
    1,
    FilterConfig::seeded(42),
)
.unwrap();

// Simulate data from the model, then filter it.
let du = DiagGaussian::isotropic(1, 1.0).unwrap();
let sim = pf.simulate(50, &du).unwrap();
let solution = forward_trajectory(&mut pf, &sim.u, &sim.y).unwrap();
assert_eq!(solution.corrections.len(), 50);
assert!(solution.loglik.is_finite());
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Error taxonomy shared by construction, filtering, smoothing and inference
pub mod error;

/// Per-filter seedable random number generation
pub mod rng;

/// Noise and prior distributions
pub mod distribution;

/// Log-space particle weights and effective sample size
pub mod weights;

/// Systematic resampling
pub mod resample;

/// User-supplied dynamics/measurement model traits
pub mod model;

/// The estimators: particle family and Gaussian family
pub mod filter;

/// Simulation and forward-pass trajectory drivers
pub mod trajectory;

/// Fixed-interval smoothers (FFBS, RTS)
pub mod smooth;

/// Likelihood functions and Metropolis sampling
pub mod inference;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Errors
pub use error::FilterError;

// Core trait and filters
pub use filter::{
    AdvancedParticleFilter, AuxiliaryParticleFilter, Coeff, Filter, FilterConfig, KalmanFilter,
    ParticleFilter, UkfParams, UnscentedKalmanFilter,
};

// Distributions
pub use distribution::{
    Categorical, Density, DiagGaussian, Gaussian, MvGaussian, TupleProduct, UnivariateDensity,
};

// Model traits
pub use model::{Dynamics, Measurement, MeasurementLikelihood, NoisyDynamics, NoisyMeasurement};

// Trajectory and smoothing surface
pub use smooth::{smooth_ffbs, smooth_rts, SmoothedGaussian, SmoothedParticles};
pub use trajectory::{forward_trajectory, mean_trajectory, Belief, ForwardSolution, Simulation};

// Inference surface
pub use inference::{log_likelihood_fun, loglik, metropolis, metropolis_threaded, Prior};

// RNG
pub use rng::FilterRng;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
