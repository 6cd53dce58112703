//! Fixed-interval smoothing
//!
//! Two smoothers over a recorded input/measurement sequence:
//! forward-filter/backward-simulate (FFBS) for particle filters and
//! Rauch-Tung-Striebel (RTS) for the Kalman filter. Both run their own
//! forward pass, so the supplied filter is reset.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distribution::Density;
use crate::error::FilterError;
use crate::filter::{KalmanFilter, ParticleFilter};
use crate::model::{Dynamics, Measurement};
use crate::rng::FilterRng;
use crate::trajectory::forward_trajectory;

/// Backward trajectories produced by [`smooth_ffbs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothedParticles {
    trajs: Vec<Vec<DVector<f64>>>,
    loglik: f64,
}

impl SmoothedParticles {
    /// The `M` backward trajectories, each of length `T`.
    pub fn smoothed_trajs(&self) -> &[Vec<DVector<f64>>] {
        &self.trajs
    }

    /// Forward-pass log-likelihood of the data.
    pub fn loglik(&self) -> f64 {
        self.loglik
    }

    /// Number of backward trajectories.
    pub fn num_trajectories(&self) -> usize {
        self.trajs.len()
    }

    /// Per-step mean over the backward trajectories.
    pub fn smoothed_mean(&self) -> Vec<DVector<f64>> {
        let m = self.trajs.len();
        let steps = self.trajs[0].len();
        let nx = self.trajs[0][0].len();
        let mut means = vec![DVector::zeros(nx); steps];
        for traj in &self.trajs {
            for (mean, x) in means.iter_mut().zip(traj) {
                mean.axpy(1.0 / m as f64, x, 1.0);
            }
        }
        means
    }

    /// Per-step sample covariance over the backward trajectories.
    pub fn smoothed_cov(&self) -> Vec<DMatrix<f64>> {
        let m = self.trajs.len();
        let steps = self.trajs[0].len();
        let nx = self.trajs[0][0].len();
        let means = self.smoothed_mean();
        let mut covs = vec![DMatrix::zeros(nx, nx); steps];
        for traj in &self.trajs {
            for t in 0..steps {
                let diff = &traj[t] - &means[t];
                covs[t].syger(1.0 / m as f64, &diff, &diff, 1.0);
            }
        }
        for cov in covs.iter_mut() {
            cov.fill_upper_triangle_with_lower_triangle();
        }
        covs
    }
}

/// Draw an index proportionally to the given log-weights, reusing `scratch`
/// for the exponentiated values.
fn sample_from_logweights(
    rng: &mut FilterRng,
    logw: &[f64],
    scratch: &mut Vec<f64>,
) -> Option<usize> {
    let max = logw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return None;
    }
    scratch.clear();
    scratch.extend(logw.iter().map(|w| (w - max).exp()));
    let total: f64 = scratch.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    let pick: f64 = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    for (i, &w) in scratch.iter().enumerate() {
        acc += w;
        if acc >= pick {
            return Some(i);
        }
    }
    Some(scratch.len() - 1)
}

/// Forward-filter/backward-simulate particle smoother.
///
/// Runs a forward pass storing every filtered cloud, then draws `m` backward
/// trajectories: the endpoint from the final weights, each earlier state
/// from the backward weights
/// `W_t[i] + log p_df(x_{t+1} - f(X_t[i], u_t, t))`.
///
/// Cost is `O(N * m * T)` process-density evaluations, which dominates the
/// forward pass for any nontrivial `m`.
pub fn smooth_ffbs<F, G, DF, DG, D0>(
    pf: &mut ParticleFilter<F, G, DF, DG, D0>,
    m: usize,
    u: &[DVector<f64>],
    y: &[DVector<f64>],
) -> Result<SmoothedParticles, FilterError>
where
    F: Dynamics,
    G: Measurement,
    DF: Density<Value = DVector<f64>>,
    DG: Density<Value = DVector<f64>>,
    D0: Density<Value = DVector<f64>>,
{
    if m < 1 {
        return Err(FilterError::Configuration {
            description: "number of backward trajectories must be at least 1".to_string(),
        });
    }
    if y.is_empty() {
        return Err(FilterError::Configuration {
            description: "cannot smooth an empty measurement sequence".to_string(),
        });
    }
    let solution = forward_trajectory(pf, u, y)?;
    let clouds = solution
        .clouds
        .expect("particle filters always record cloud history");
    let steps = clouds.len();
    let n = pf.num_particles();

    let mut trajs = Vec::with_capacity(m);
    let mut beta = vec![0.0; n];
    let mut scratch = Vec::with_capacity(n);

    for _ in 0..m {
        let mut traj = vec![DVector::zeros(0); steps];
        let last = &clouds[steps - 1];
        let idx = sample_from_logweights(pf.rng_mut(), &last.log_weights, &mut scratch)
            .ok_or(FilterError::DegenerateWeights { timestep: steps - 1 })?;
        traj[steps - 1] = last.particles[idx].clone();

        for t in (0..steps - 1).rev() {
            let cloud = &clouds[t];
            let target = &traj[t + 1];
            for i in 0..n {
                let predicted = pf.dynamics_mean(&cloud.particles[i], &u[t], t);
                beta[i] = cloud.log_weights[i] + pf.process_logpdf(&(target - predicted));
            }
            let ancestor = sample_from_logweights(pf.rng_mut(), &beta, &mut scratch)
                .ok_or(FilterError::DegenerateWeights { timestep: t })?;
            traj[t] = cloud.particles[ancestor].clone();
        }
        trajs.push(traj);
    }

    Ok(SmoothedParticles {
        trajs,
        loglik: solution.loglik,
    })
}

/// Result of [`smooth_rts`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothedGaussian {
    /// Smoothed means, one per step.
    pub means: Vec<DVector<f64>>,
    /// Smoothed covariances, one per step.
    pub covs: Vec<DMatrix<f64>>,
    /// Forward-pass log-likelihood of the data.
    pub loglik: f64,
}

/// Rauch-Tung-Striebel fixed-interval smoother for the Kalman filter.
///
/// Forward pass stores the filtered and one-step-predicted beliefs, then the
/// backward recursion folds future measurements into every step. The
/// smoothed belief at the final step equals the filtered one.
pub fn smooth_rts(
    kf: &mut KalmanFilter,
    u: &[DVector<f64>],
    y: &[DVector<f64>],
) -> Result<SmoothedGaussian, FilterError> {
    if y.is_empty() {
        return Err(FilterError::Configuration {
            description: "cannot smooth an empty measurement sequence".to_string(),
        });
    }
    let solution = forward_trajectory(kf, u, y)?;
    let steps = y.len();
    let mut means = vec![DVector::zeros(0); steps];
    let mut covs = vec![DMatrix::zeros(0, 0); steps];
    means[steps - 1] = solution.corrections[steps - 1].mean.clone();
    covs[steps - 1] = solution.corrections[steps - 1].cov.clone();

    for t in (0..steps - 1).rev() {
        let filtered = &solution.corrections[t];
        let predicted = &solution.predictions[t + 1];
        let a = kf.transition_at(t);
        let ar = &*a * &filtered.cov;

        // Gain G = R_t Aᵀ P_{t+1|t}⁻¹ = (P_{t+1|t}⁻¹ A R_t)ᵀ.
        let gain = match predicted.cov.clone().cholesky() {
            Some(chol) => chol.solve(&ar).transpose(),
            None => {
                let lu = predicted.cov.clone().lu();
                lu.solve(&ar)
                    .ok_or_else(|| FilterError::SingularInnovation {
                        context: format!("predicted covariance at t={} in RTS pass", t + 1),
                    })?
                    .transpose()
            }
        };

        means[t] = &filtered.mean + &gain * (&means[t + 1] - &predicted.mean);
        let mut cov =
            &filtered.cov + &gain * (&covs[t + 1] - &predicted.cov) * gain.transpose();
        let ct = cov.transpose();
        cov += ct;
        cov *= 0.5;
        covs[t] = cov;
    }

    Ok(SmoothedGaussian {
        means,
        covs,
        loglik: solution.loglik,
    })
}
