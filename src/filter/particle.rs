//! Bootstrap particle filter

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use super::cloud::ParticleCloud;
use super::{check_dim, Filter, FilterConfig};
use crate::distribution::Density;
use crate::error::FilterError;
use crate::model::{Dynamics, Measurement};
use crate::resample::resampling_needed;
use crate::rng::FilterRng;
use crate::trajectory::Simulation;

/// Sequential importance resampling filter with additive process and
/// measurement noise.
///
/// Particles are propagated through the user dynamics plus a draw from the
/// process-noise distribution `df`; corrections weight each particle by the
/// measurement-noise density `dg` evaluated at the innovation. Resampling is
/// systematic and triggered when the effective sample size falls below the
/// configured fraction of `N`.
///
/// ```
/// use nalgebra::DVector;
/// use sequor::distribution::DiagGaussian;
/// use sequor::filter::{Filter, FilterConfig, ParticleFilter};
///
/// let dynamics = |x: &DVector<f64>, u: &DVector<f64>, _t: usize| x * 0.9 + u;
/// let measurement = |x: &DVector<f64>, _u: &DVector<f64>, _t: usize| x.clone();
/// let mut pf = ParticleFilter::new(
///     500,
///     dynamics,
///     measurement,
///     DiagGaussian::isotropic(2, 1.0).unwrap(),
///     DiagGaussian::isotropic(2, 1.0).unwrap(),
///     DiagGaussian::isotropic(2, 2.0).unwrap(),
///     2,
///     FilterConfig::seeded(1),
/// )
/// .unwrap();
///
/// let u = DVector::zeros(2);
/// let y = DVector::from_vec(vec![0.5, -0.5]);
/// let increment = pf.step(&u, &y).unwrap();
/// assert!(increment.is_finite());
/// ```
pub struct ParticleFilter<F, G, DF, DG, D0> {
    dynamics: F,
    measurement: G,
    df: DF,
    dg: DG,
    d0: D0,
    cloud: ParticleCloud,
    rng: FilterRng,
    t: usize,
    loglik: f64,
    resample_threshold: f64,
    nx: usize,
    nu: usize,
    ny: usize,
}

impl<F, G, DF, DG, D0> ParticleFilter<F, G, DF, DG, D0>
where
    F: Dynamics,
    G: Measurement,
    DF: Density<Value = DVector<f64>>,
    DG: Density<Value = DVector<f64>>,
    D0: Density<Value = DVector<f64>>,
{
    /// Create a filter with `n` particles drawn from `d0`.
    ///
    /// `df` and `dg` are the process- and measurement-noise distributions;
    /// `nu` fixes the control dimension for input validation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n: usize,
        dynamics: F,
        measurement: G,
        df: DF,
        dg: DG,
        d0: D0,
        nu: usize,
        config: FilterConfig,
    ) -> Result<Self, FilterError> {
        if n < 1 {
            return Err(FilterError::Configuration {
                description: "particle count must be at least 1".to_string(),
            });
        }
        config.validate()?;
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
        let ny = dg.dim();
        let mut rng = FilterRng::new(config.seed);
        let mut cloud = ParticleCloud::new(n, nx);
        cloud.init_from(&d0, &mut rng);
        Ok(Self {
            dynamics,
            measurement,
            df,
            dg,
            d0,
            cloud,
            rng,
            t: 0,
            loglik: 0.0,
            resample_threshold: config.resample_threshold,
            nx,
            nu,
            ny,
        })
    }

    /// Number of particles.
    pub fn num_particles(&self) -> usize {
        self.cloud.len()
    }

    /// Posterior mean under the current weights.
    pub fn weighted_mean(&self) -> DVector<f64> {
        self.cloud.weighted_mean()
    }

    /// Posterior covariance under the current weights.
    pub fn weighted_cov(&self) -> DMatrix<f64> {
        self.cloud.weighted_cov()
    }

    /// Exponentiated (linear-scale) weights.
    pub fn expweights(&mut self) -> &[f64] {
        self.cloud.w.expweights()
    }

    /// Effective sample size of the current weights.
    pub fn ess(&self) -> f64 {
        self.cloud.w.ess()
    }

    pub(crate) fn rng_mut(&mut self) -> &mut FilterRng {
        &mut self.rng
    }

    /// Deterministic one-step prediction (dynamics without noise).
    pub(crate) fn dynamics_mean(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
    ) -> DVector<f64> {
        self.dynamics.step(x, u, t)
    }

    /// Process-noise log-density of a transition residual.
    pub(crate) fn process_logpdf(&self, residual: &DVector<f64>) -> f64 {
        self.df.logpdf(residual)
    }

    /// Add externally computed log-weight corrections (auxiliary filter
    /// unwinding its first-stage weights) before the usual correction.
    pub(crate) fn correct_with_offset(
        &mut self,
        y: &DVector<f64>,
        u: &DVector<f64>,
        offset: Option<&[f64]>,
    ) -> Result<f64, FilterError> {
        check_dim(self.ny, y.len(), "measurement")?;
        check_dim(self.nu, u.len(), "control input")?;

        let t = self.t;
        let measurement = &self.measurement;
        let dg = &self.dg;
        let ParticleCloud { x, w, .. } = &mut self.cloud;

        w.save();
        w.add_logweights(|i| {
            let innovation = y - measurement.observe(&x[i], u, t);
            let lp = dg.logpdf(&innovation);
            match offset {
                Some(offset) => lp - offset[i],
                None => lp,
            }
        });
        let increment = match w.normalize(t) {
            Ok(inc) => inc,
            Err(e) => {
                w.restore();
                return Err(e);
            }
        };
        self.loglik += increment;

        let n = self.cloud.len();
        let ess = self.cloud.w.ess();
        if resampling_needed(ess, n, self.resample_threshold) {
            log::debug!("resampling at t={} (ESS {:.1} of {})", t, ess, n);
            self.cloud.resample(&mut self.rng, None, t)?;
        }
        Ok(increment)
    }

    /// Propagate every particle through the dynamics with process noise.
    /// Committed only if every output is finite.
    fn propagate(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        check_dim(self.nu, u.len(), "control input")?;
        for i in 0..self.cloud.len() {
            let mut xi = self.dynamics.step(&self.cloud.x[i], u, self.t);
            check_dim(self.nx, xi.len(), "dynamics output")?;
            xi += self.df.sample(&mut self.rng);
            if !xi.iter().all(|v| v.is_finite()) {
                return Err(FilterError::NonFinite {
                    context: format!("dynamics output at t={}", self.t),
                });
            }
            self.cloud.staging[i] = xi;
        }
        self.cloud.commit_staging();
        self.t += 1;
        Ok(())
    }

    /// First-stage log-weights of the auxiliary filter: the measurement
    /// density of the upcoming observation at each particle's deterministic
    /// one-step prediction (dynamics without noise).
    pub(crate) fn lookahead_weights(
        &self,
        u: &DVector<f64>,
        y_next: &DVector<f64>,
        out: &mut [f64],
    ) {
        for (i, slot) in out.iter_mut().enumerate() {
            let mu = self.dynamics.step(&self.cloud.x[i], u, self.t);
            let innovation = y_next - self.measurement.observe(&mu, u, self.t);
            *slot = self.dg.logpdf(&innovation);
        }
    }

    /// First-stage resample on `W + aux`, then propagate (auxiliary filter).
    /// Returns the first-stage likelihood normalizer.
    pub(crate) fn resample_propagate(
        &mut self,
        u: &DVector<f64>,
        aux: &[f64],
        parent_aux: &mut [f64],
    ) -> Result<f64, FilterError> {
        let stage_ll = self.cloud.resample(&mut self.rng, Some(aux), self.t)?;
        for (slot, &a) in parent_aux.iter_mut().zip(self.cloud.ancestors().iter()) {
            *slot = aux[a];
        }
        self.propagate(u)?;
        Ok(stage_ll)
    }

    /// Fold an externally computed likelihood contribution into the running
    /// total (the auxiliary filter's first-stage normalizer).
    pub(crate) fn bump_loglik(&mut self, v: f64) {
        self.loglik += v;
    }
}

impl<F, G, DF, DG, D0> Filter for ParticleFilter<F, G, DF, DG, D0>
where
    F: Dynamics,
    G: Measurement,
    DF: Density<Value = DVector<f64>>,
    DG: Density<Value = DVector<f64>>,
    D0: Density<Value = DVector<f64>>,
{
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        self.propagate(u)
    }

    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError> {
        self.correct_with_offset(y, u, None)
    }

    fn state(&self) -> DVector<f64> {
        self.weighted_mean()
    }

    fn covariance(&self) -> DMatrix<f64> {
        self.weighted_cov()
    }

    fn loglik(&self) -> f64 {
        self.loglik
    }

    fn timestep(&self) -> usize {
        self.t
    }

    fn reset(&mut self) {
        self.rng.reseed();
        self.cloud.init_from(&self.d0, &mut self.rng);
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
        // Draw a particle proportionally to its weight, then push it through
        // the measurement model with noise.
        let pick: f64 = self.rng.gen();
        let weights = self.cloud.w.expweights();
        let mut acc = 0.0;
        let mut idx = weights.len() - 1;
        for (i, &wi) in weights.iter().enumerate() {
            acc += wi;
            if acc >= pick {
                idx = i;
                break;
            }
        }
        let yhat = self.measurement.observe(&self.cloud.x[idx], u, self.t);
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

    fn particles(&self) -> Option<&[DVector<f64>]> {
        Some(&self.cloud.x)
    }

    fn log_weights(&self) -> Option<&[f64]> {
        Some(self.cloud.w.log_weights())
    }
}
