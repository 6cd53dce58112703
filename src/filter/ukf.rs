//! Unscented Kalman filter

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{check_dim, Filter};
use crate::distribution::{Density, MvGaussian};
use crate::error::FilterError;
use crate::model::{Dynamics, Measurement};
use crate::rng::FilterRng;
use crate::trajectory::Simulation;

const LOG_2PI: f64 = 1.8378770664093453; // ln(2π)

type WeightVec = SmallVec<[f64; 16]>;

/// Scaled unscented transform parameters.
///
/// `alpha` controls the sigma-point spread, `beta` folds in prior knowledge
/// of the distribution (2 is exact for Gaussians), `kappa` is the secondary
/// scaling term.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UkfParams {
    pub alpha: f64,
    pub beta: f64,
    pub kappa: f64,
}

impl Default for UkfParams {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

impl UkfParams {
    fn lambda(&self, n: usize) -> f64 {
        self.alpha * self.alpha * (n as f64 + self.kappa) - n as f64
    }

    /// Mean and covariance weight sets for `2n + 1` sigma points.
    fn weights(&self, n: usize) -> (WeightVec, WeightVec) {
        let lambda = self.lambda(n);
        let denom = n as f64 + lambda;
        let mut wm = WeightVec::with_capacity(2 * n + 1);
        let mut wc = WeightVec::with_capacity(2 * n + 1);
        wm.push(lambda / denom);
        wc.push(lambda / denom + (1.0 - self.alpha * self.alpha + self.beta));
        for _ in 0..2 * n {
            wm.push(0.5 / denom);
            wc.push(0.5 / denom);
        }
        (wm, wc)
    }
}

/// Unscented Kalman filter for nonlinear dynamics and measurement models
/// with additive Gaussian noise.
///
/// `2nx + 1` sigma points are generated with the symmetric scaled unscented
/// transform and pushed through the nonlinear models; mean and covariance
/// are recomposed by weighted sums and the correction uses the
/// cross-covariance form of the gain. Sigma-point buffers are allocated once
/// at construction.
pub struct UnscentedKalmanFilter<F, G> {
    dynamics: F,
    measurement: G,
    df: MvGaussian,
    dg: MvGaussian,
    d0: MvGaussian,
    params: UkfParams,
    x: DVector<f64>,
    r: DMatrix<f64>,
    sigma: Vec<DVector<f64>>,
    sigma_h: Vec<DVector<f64>>,
    wm: WeightVec,
    wc: WeightVec,
    rng: FilterRng,
    t: usize,
    loglik: f64,
    nx: usize,
    nu: usize,
    ny: usize,
}

impl<F, G> UnscentedKalmanFilter<F, G>
where
    F: Dynamics,
    G: Measurement,
{
    /// Create a filter with process noise `df`, measurement noise `dg` and
    /// initial-state distribution `d0`, all Gaussian. `nu` fixes the control
    /// dimension.
    pub fn new(
        dynamics: F,
        measurement: G,
        df: MvGaussian,
        dg: MvGaussian,
        d0: MvGaussian,
        nu: usize,
        params: UkfParams,
    ) -> Result<Self, FilterError> {
        let nx = d0.dim();
        if df.dim() != nx {
            return Err(FilterError::Configuration {
                description: format!(
                    "process noise has dimension {} but initial distribution has {}",
                    df.dim(),
                    nx
                ),
            });
        }
        if !(params.alpha > 0.0) {
            return Err(FilterError::Configuration {
                description: format!("UKF alpha must be positive, got {}", params.alpha),
            });
        }
        let ny = dg.dim();
        let (wm, wc) = params.weights(nx);
        let x = d0.mean().clone();
        let r = d0.cov().clone();
        Ok(Self {
            dynamics,
            measurement,
            df,
            dg,
            d0,
            params,
            x,
            r,
            sigma: vec![DVector::zeros(nx); 2 * nx + 1],
            sigma_h: vec![DVector::zeros(ny); 2 * nx + 1],
            wm,
            wc,
            rng: FilterRng::from_entropy(),
            t: 0,
            loglik: 0.0,
            nx,
            nu,
            ny,
        })
    }

    /// Replace the RNG seed (used by `simulate` and `sample_measurement`).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = FilterRng::from_seed(seed);
        self
    }

    /// Fill `self.sigma` with `2nx + 1` points from the current belief.
    ///
    /// A failed Cholesky factorization is retried once after adding
    /// `eps * I` with `eps = 1e-8 * trace(R) / nx`.
    fn generate_sigma(&mut self) -> Result<(), FilterError> {
        let gamma = (self.nx as f64 + self.params.lambda(self.nx)).sqrt();
        let chol = match self.r.clone().cholesky() {
            Some(c) => c,
            None => {
                let eps = 1e-8 * self.r.trace() / self.nx as f64;
                log::warn!(
                    "belief covariance not positive definite at t={}, regularising with eps={:e}",
                    self.t,
                    eps
                );
                for i in 0..self.nx {
                    self.r[(i, i)] += eps;
                }
                self.r
                    .clone()
                    .cholesky()
                    .ok_or_else(|| FilterError::SingularInnovation {
                        context: format!("sigma-point covariance at t={}", self.t),
                    })?
            }
        };
        let spread = chol.l() * gamma;
        self.sigma[0].copy_from(&self.x);
        for i in 0..self.nx {
            let col = spread.column(i);
            self.sigma[1 + i].copy_from(&self.x);
            self.sigma[1 + i] += &col;
            self.sigma[1 + self.nx + i].copy_from(&self.x);
            self.sigma[1 + self.nx + i] -= &col;
        }
        Ok(())
    }

    fn weighted_mean(points: &[DVector<f64>], wm: &[f64], dim: usize) -> DVector<f64> {
        let mut mean = DVector::zeros(dim);
        for (p, &w) in points.iter().zip(wm) {
            mean.axpy(w, p, 1.0);
        }
        mean
    }
}

impl<F, G> Filter for UnscentedKalmanFilter<F, G>
where
    F: Dynamics,
    G: Measurement,
{
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        check_dim(self.nu, u.len(), "control input")?;
        self.generate_sigma()?;
        for point in self.sigma.iter_mut() {
            let propagated = self.dynamics.step(point, u, self.t);
            check_dim(self.nx, propagated.len(), "dynamics output")?;
            if !propagated.iter().all(|v| v.is_finite()) {
                return Err(FilterError::NonFinite {
                    context: format!("dynamics output at t={}", self.t),
                });
            }
            *point = propagated;
        }
        let mean = Self::weighted_mean(&self.sigma, &self.wm, self.nx);
        let mut cov = self.df.cov().clone();
        for (p, &w) in self.sigma.iter().zip(&self.wc) {
            let diff = p - &mean;
            cov.syger(w, &diff, &diff, 1.0);
        }
        cov.fill_upper_triangle_with_lower_triangle();
        self.x = mean;
        self.r = cov;
        self.t += 1;
        Ok(())
    }

    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError> {
        check_dim(self.ny, y.len(), "measurement")?;
        check_dim(self.nu, u.len(), "control input")?;
        self.generate_sigma()?;
        for (point, yhat) in self.sigma.iter().zip(self.sigma_h.iter_mut()) {
            let observed = self.measurement.observe(point, u, self.t);
            check_dim(self.ny, observed.len(), "measurement output")?;
            *yhat = observed;
        }
        let z_mean = Self::weighted_mean(&self.sigma_h, &self.wm, self.ny);

        let mut s = self.dg.cov().clone();
        for (yhat, &w) in self.sigma_h.iter().zip(&self.wc) {
            let diff = yhat - &z_mean;
            s.syger(w, &diff, &diff, 1.0);
        }
        s.fill_upper_triangle_with_lower_triangle();

        let mut cross = DMatrix::zeros(self.nx, self.ny);
        for ((point, yhat), &w) in self.sigma.iter().zip(&self.sigma_h).zip(&self.wc) {
            let dx = point - &self.x;
            let dz = yhat - &z_mean;
            cross.ger(w, &dx, &dz, 1.0);
        }

        let e = y - &z_mean;
        // Gain K = C_xz S⁻¹ = (S⁻¹ C_xzᵀ)ᵀ.
        let (gain, mahalanobis, logdet) = match s.clone().cholesky() {
            Some(chol) => {
                let solved = chol.solve(&cross.transpose());
                let e_solved = chol.solve(&e);
                let logdet = 2.0
                    * chol
                        .l_dirty()
                        .diagonal()
                        .iter()
                        .map(|v| v.ln())
                        .sum::<f64>();
                (solved.transpose(), e.dot(&e_solved), logdet)
            }
            None => {
                log::warn!(
                    "innovation covariance not positive definite at t={}, falling back to LU",
                    self.t
                );
                let lu = s.clone().lu();
                let det = lu.determinant();
                if !(det > 0.0 && det.is_finite()) {
                    return Err(FilterError::SingularInnovation {
                        context: format!("innovation covariance at t={}", self.t),
                    });
                }
                let solved =
                    lu.solve(&cross.transpose())
                        .ok_or_else(|| FilterError::SingularInnovation {
                            context: format!("innovation covariance at t={}", self.t),
                        })?;
                let e_solved = lu.solve(&e).ok_or_else(|| FilterError::SingularInnovation {
                    context: format!("innovation covariance at t={}", self.t),
                })?;
                (solved.transpose(), e.dot(&e_solved), det.ln())
            }
        };

        self.x += &gain * &e;
        self.r -= &gain * &s * gain.transpose();
        let rt = self.r.transpose();
        self.r += rt;
        self.r *= 0.5;

        let increment = -0.5 * (self.ny as f64 * LOG_2PI + logdet + mahalanobis);
        self.loglik += increment;
        Ok(increment)
    }

    fn state(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn covariance(&self) -> DMatrix<f64> {
        self.r.clone()
    }

    fn loglik(&self) -> f64 {
        self.loglik
    }

    fn timestep(&self) -> usize {
        self.t
    }

    fn reset(&mut self) {
        self.rng.reseed();
        self.x = self.d0.mean().clone();
        self.r = self.d0.cov().clone();
        self.t = 0;
        self.loglik = 0.0;
    }

    fn x_dim(&self) -> usize {
        self.nx
    }

    fn u_dim(&self) -> usize {
        self.nu
    }

    fn y_dim(&self) -> usize {
        self.ny
    }

    fn seed(&self) -> u64 {
        self.rng.seed()
    }

    fn sample_measurement(&mut self, u: &DVector<f64>) -> Result<DVector<f64>, FilterError> {
        check_dim(self.nu, u.len(), "control input")?;
        let yhat = self.measurement.observe(&self.x, u, self.t);
        Ok(yhat + self.dg.sample(&mut self.rng))
    }

    fn simulate(
        &mut self,
        steps: usize,
        du: &dyn Density<Value = DVector<f64>>,
    ) -> Result<Simulation, FilterError> {
        check_dim(self.nu, du.dim(), "control distribution")?;
        let mut xs = Vec::with_capacity(steps);
        let mut us = Vec::with_capacity(steps);
        let mut ys = Vec::with_capacity(steps);
        let mut x = self.d0.sample(&mut self.rng);
        for t in 0..steps {
            let u = du.sample(&mut self.rng);
            let y = self.measurement.observe(&x, &u, t) + self.dg.sample(&mut self.rng);
            let next = self.dynamics.step(&x, &u, t) + self.df.sample(&mut self.rng);
            if !next.iter().all(|v| v.is_finite()) {
                return Err(FilterError::NonFinite {
                    context: format!("simulated dynamics at t={}", t),
                });
            }
            xs.push(x);
            us.push(u);
            ys.push(y);
            x = next;
        }
        Ok(Simulation {
            x: xs,
            u: us,
            y: ys,
        })
    }
}
