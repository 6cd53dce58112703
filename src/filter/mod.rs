//! Filter implementations and the shared estimator capability set
//!
//! Four estimators share the [`Filter`] trait: the sequential Monte Carlo
//! family ([`ParticleFilter`], [`AuxiliaryParticleFilter`],
//! [`AdvancedParticleFilter`]) and the Gaussian family ([`KalmanFilter`],
//! [`UnscentedKalmanFilter`]). Trajectory drivers, smoothers and the
//! inference layer take the trait as a bound; the auxiliary variant wraps a
//! base particle filter by composition rather than inheritance.

mod advanced;
mod auxiliary;
mod cloud;
mod kalman;
mod particle;
mod ukf;

pub use advanced::AdvancedParticleFilter;
pub use auxiliary::AuxiliaryParticleFilter;
pub use kalman::{Coeff, KalmanFilter};
pub use particle::ParticleFilter;
pub use ukf::{UkfParams, UnscentedKalmanFilter};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::distribution::Density;
use crate::error::FilterError;
use crate::resample::DEFAULT_RESAMPLE_THRESHOLD;
use crate::trajectory::Simulation;

/// Construction options shared by the particle filter family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Resample when `ESS < resample_threshold * N`. Must lie in `(0, 1]`.
    pub resample_threshold: f64,
    /// RNG seed; drawn from OS entropy when `None`. The effective seed is
    /// retrievable through [`Filter::seed`].
    pub seed: Option<u64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            resample_threshold: DEFAULT_RESAMPLE_THRESHOLD,
            seed: None,
        }
    }
}

impl FilterConfig {
    /// Deterministic configuration with the default threshold.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), FilterError> {
        if !(self.resample_threshold > 0.0 && self.resample_threshold <= 1.0) {
            return Err(FilterError::Configuration {
                description: format!(
                    "resample threshold must lie in (0, 1], got {}",
                    self.resample_threshold
                ),
            });
        }
        Ok(())
    }
}

/// Common capability set of all estimators.
///
/// A filter owns its belief, its RNG, a monotonic time index `t` (advanced
/// only by `predict`) and the accumulated log-likelihood. `predict` and
/// `correct` take `&mut self` and are applied in the order issued; read-only
/// accessors may be called on a quiescent filter.
pub trait Filter {
    /// Time update: propagate the belief through the dynamics, advancing `t`.
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError>;

    /// Measurement update at the current `t`. Returns the step log-likelihood
    /// increment; the cumulative [`Filter::loglik`] is the sum of these.
    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError>;

    /// Time update with the next measurement available for guidance.
    ///
    /// The default ignores the lookahead; the auxiliary particle filter uses
    /// it for first-stage resampling.
    fn predict_guided(
        &mut self,
        u: &DVector<f64>,
        y_next: Option<&DVector<f64>>,
    ) -> Result<(), FilterError> {
        let _ = y_next;
        self.predict(u)
    }

    /// One filtering step: `correct` with the current measurement, then
    /// `predict` to the next time. Returns the correction increment.
    fn step(&mut self, u: &DVector<f64>, y: &DVector<f64>) -> Result<f64, FilterError> {
        let ll = self.correct(y, u)?;
        self.predict(u)?;
        Ok(ll)
    }

    /// Point estimate of the current state (posterior mean).
    fn state(&self) -> DVector<f64>;

    /// Covariance of the current belief.
    fn covariance(&self) -> DMatrix<f64>;

    /// Accumulated log-likelihood of all measurements absorbed so far.
    fn loglik(&self) -> f64;

    /// Current time index.
    fn timestep(&self) -> usize;

    /// Reinitialize the belief from the initial-state distribution, zero `t`
    /// and the accumulated log-likelihood, and rewind the RNG to its seed.
    fn reset(&mut self);

    /// State dimension `nx`.
    fn x_dim(&self) -> usize;

    /// Control dimension `nu`.
    fn u_dim(&self) -> usize;

    /// Measurement dimension `ny`.
    fn y_dim(&self) -> usize;

    /// The RNG seed this filter runs under.
    fn seed(&self) -> u64;

    /// Draw a measurement from the current belief through the measurement
    /// model, including measurement noise.
    fn sample_measurement(&mut self, u: &DVector<f64>) -> Result<DVector<f64>, FilterError>;

    /// Generate a state/input/measurement trajectory of the given length by
    /// iterating the model with inputs drawn from `du`. The filter belief is
    /// untouched; only its RNG advances.
    fn simulate(
        &mut self,
        steps: usize,
        du: &dyn Density<Value = DVector<f64>>,
    ) -> Result<Simulation, FilterError>;

    /// Particle positions, for estimators carrying a cloud.
    fn particles(&self) -> Option<&[DVector<f64>]> {
        None
    }

    /// Normalized log-weights, for estimators carrying a cloud.
    fn log_weights(&self) -> Option<&[f64]> {
        None
    }
}

pub(crate) fn check_dim(expected: usize, actual: usize, context: &str) -> Result<(), FilterError> {
    if expected != actual {
        return Err(FilterError::DimensionMismatch {
            expected,
            actual,
            context: context.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(FilterConfig::default().validate().is_ok());
        assert!(FilterConfig::seeded(1).validate().is_ok());

        let bad = FilterConfig {
            resample_threshold: 0.0,
            seed: None,
        };
        assert!(bad.validate().is_err());
        let bad = FilterConfig {
            resample_threshold: 1.5,
            seed: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let cfg = FilterConfig::seeded(42);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, Some(42));
        assert_eq!(back.resample_threshold, cfg.resample_threshold);
    }

    #[test]
    fn test_check_dim() {
        assert!(check_dim(2, 2, "control input").is_ok());
        assert!(matches!(
            check_dim(2, 3, "measurement"),
            Err(FilterError::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }
}
