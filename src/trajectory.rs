//! Trajectory drivers
//!
//! Runs a filter over recorded input/measurement sequences, capturing the
//! per-step beliefs and log-likelihood increments. For particle filters the
//! full particle/weight history is captured as well, which the
//! forward-filter/backward-simulate smoother consumes.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::filter::Filter;

/// A simulated state/input/measurement trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    /// True states `x_0 .. x_{T-1}`.
    pub x: Vec<DVector<f64>>,
    /// Inputs `u_0 .. u_{T-1}`.
    pub u: Vec<DVector<f64>>,
    /// Noisy measurements `y_0 .. y_{T-1}`.
    pub y: Vec<DVector<f64>>,
}

/// First two moments of a belief at one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Belief {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
}

/// Particle cloud captured at one step of a forward pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSnapshot {
    pub particles: Vec<DVector<f64>>,
    pub log_weights: Vec<f64>,
}

/// Result of [`forward_trajectory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardSolution {
    /// Belief before each correction (the one-step prediction).
    pub predictions: Vec<Belief>,
    /// Belief after each correction.
    pub corrections: Vec<Belief>,
    /// Per-step log-likelihood increments.
    pub step_loglik: Vec<f64>,
    /// Total log-likelihood, the sum of the increments.
    pub loglik: f64,
    /// Filtered particle clouds, present for particle filters.
    pub clouds: Option<Vec<CloudSnapshot>>,
}

fn check_lengths(u: &[DVector<f64>], y: &[DVector<f64>]) -> Result<(), FilterError> {
    if u.len() != y.len() {
        return Err(FilterError::DimensionMismatch {
            expected: u.len(),
            actual: y.len(),
            context: "input/measurement sequence length".to_string(),
        });
    }
    Ok(())
}

/// Run the filter over the full sequence, recording pre- and post-correction
/// beliefs and every log-likelihood increment.
///
/// The filter is reset first. Each step corrects with the current
/// measurement and then predicts, passing the next measurement as lookahead
/// guidance where one exists.
pub fn forward_trajectory<E: Filter>(
    estimator: &mut E,
    u: &[DVector<f64>],
    y: &[DVector<f64>],
) -> Result<ForwardSolution, FilterError> {
    check_lengths(u, y)?;
    estimator.reset();
    let steps = y.len();
    let mut predictions = Vec::with_capacity(steps);
    let mut corrections = Vec::with_capacity(steps);
    let mut step_loglik = Vec::with_capacity(steps);
    let mut clouds = estimator.particles().map(|_| Vec::with_capacity(steps));

    for t in 0..steps {
        predictions.push(Belief {
            mean: estimator.state(),
            cov: estimator.covariance(),
        });
        let increment = estimator.correct(&y[t], &u[t])?;
        step_loglik.push(increment);
        corrections.push(Belief {
            mean: estimator.state(),
            cov: estimator.covariance(),
        });
        if let Some(history) = clouds.as_mut() {
            // Both accessors are Some for any filter that carries a cloud.
            let particles = estimator.particles().unwrap_or_default().to_vec();
            let log_weights = estimator.log_weights().unwrap_or_default().to_vec();
            history.push(CloudSnapshot {
                particles,
                log_weights,
            });
        }
        estimator.predict_guided(&u[t], y.get(t + 1))?;
    }
    let loglik = step_loglik.iter().sum();
    Ok(ForwardSolution {
        predictions,
        corrections,
        step_loglik,
        loglik,
        clouds,
    })
}

/// Run the filter over the full sequence, storing only the post-correction
/// means. Returns the mean history and the total log-likelihood.
pub fn mean_trajectory<E: Filter>(
    estimator: &mut E,
    u: &[DVector<f64>],
    y: &[DVector<f64>],
) -> Result<(Vec<DVector<f64>>, f64), FilterError> {
    check_lengths(u, y)?;
    estimator.reset();
    let mut means = Vec::with_capacity(y.len());
    let mut total = 0.0;
    for t in 0..y.len() {
        total += estimator.correct(&y[t], &u[t])?;
        means.push(estimator.state());
        estimator.predict_guided(&u[t], y.get(t + 1))?;
    }
    Ok((means, total))
}
