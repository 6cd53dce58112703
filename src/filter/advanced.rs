//! Particle filter with user-controlled noise and likelihood

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use super::cloud::ParticleCloud;
use super::{check_dim, Filter, FilterConfig};
use crate::distribution::Density;
use crate::error::FilterError;
use crate::model::{MeasurementLikelihood, NoisyDynamics, NoisyMeasurement};
use crate::resample::resampling_needed;
use crate::rng::FilterRng;
use crate::trajectory::Simulation;

/// Particle filter for state-dependent noise and non-additive measurement
/// models.
///
/// The state layout matches [`super::ParticleFilter`], but noise injection is
/// delegated to the user's dynamics (`noise = true` during propagation) and
/// the correction weights come from a user-supplied measurement
/// log-likelihood instead of an additive-noise density.
pub struct AdvancedParticleFilter<F, G, L, D0> {
    dynamics: F,
    measurement: G,
    likelihood: L,
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

impl<F, G, L, D0> AdvancedParticleFilter<F, G, L, D0>
where
    F: NoisyDynamics,
    G: NoisyMeasurement,
    L: MeasurementLikelihood,
    D0: Density<Value = DVector<f64>>,
{
    /// Create a filter with `n` particles drawn from `d0`.
    ///
    /// `measurement` is used for simulation and measurement sampling;
    /// `likelihood` scores observations during correction. `nu` and `ny` fix
    /// the control and measurement dimensions for input validation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n: usize,
        dynamics: F,
        measurement: G,
        likelihood: L,
        d0: D0,
        nu: usize,
        ny: usize,
        config: FilterConfig,
    ) -> Result<Self, FilterError> {
        if n < 1 {
            return Err(FilterError::Configuration {
                description: "particle count must be at least 1".to_string(),
            });
        }
        config.validate()?;
        let nx = d0.dim();
        let mut rng = FilterRng::new(config.seed);
        let mut cloud = ParticleCloud::new(n, nx);
        cloud.init_from(&d0, &mut rng);
        Ok(Self {
            dynamics,
            measurement,
            likelihood,
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
}

impl<F, G, L, D0> Filter for AdvancedParticleFilter<F, G, L, D0>
where
    F: NoisyDynamics,
    G: NoisyMeasurement,
    L: MeasurementLikelihood,
    D0: Density<Value = DVector<f64>>,
{
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        check_dim(self.nu, u.len(), "control input")?;
        for i in 0..self.cloud.len() {
            let xi = self
                .dynamics
                .step(&mut self.rng, &self.cloud.x[i], u, self.t, true);
            check_dim(self.nx, xi.len(), "dynamics output")?;
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

    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError> {
        check_dim(self.ny, y.len(), "measurement")?;
        check_dim(self.nu, u.len(), "control input")?;

        let t = self.t;
        let likelihood = &self.likelihood;
        let ParticleCloud { x, w, .. } = &mut self.cloud;

        w.save();
        w.add_logweights(|i| likelihood.loglik(&x[i], u, y, t));
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
        let Self {
            rng,
            cloud,
            measurement,
            ..
        } = self;
        Ok(measurement.observe(rng, &cloud.x[idx], u, self.t, true))
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
            let y = self.measurement.observe(&mut self.rng, &x, &u, t, true);
            let next = self.dynamics.step(&mut self.rng, &x, &u, t, true);
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rand_distr::{Distribution, StandardNormal};

    fn scalar_model_filter(
        n: usize,
        seed: u64,
    ) -> AdvancedParticleFilter<
        impl NoisyDynamics,
        impl NoisyMeasurement,
        impl MeasurementLikelihood,
        crate::distribution::DiagGaussian,
    > {
        let dynamics = |rng: &mut dyn RngCore,
                        x: &DVector<f64>,
                        _u: &DVector<f64>,
                        _t: usize,
                        noise: bool| {
            let mut next = x * 0.9;
            if noise {
                let eta: f64 = StandardNormal.sample(rng);
                next[0] += eta;
            }
            next
        };
        let measurement = |rng: &mut dyn RngCore,
                           x: &DVector<f64>,
                           _u: &DVector<f64>,
                           _t: usize,
                           noise: bool| {
            let mut y = x.clone();
            if noise {
                let nu: f64 = StandardNormal.sample(rng);
                y[0] += nu;
            }
            y
        };
        let likelihood =
            |x: &DVector<f64>, _u: &DVector<f64>, y: &DVector<f64>, _t: usize| {
                let z = y[0] - x[0];
                -0.5 * (z * z + (2.0 * std::f64::consts::PI).ln())
            };
        AdvancedParticleFilter::new(
            n,
            dynamics,
            measurement,
            likelihood,
            crate::distribution::DiagGaussian::isotropic(1, 2.0).unwrap(),
            0,
            1,
            FilterConfig::seeded(seed),
        )
        .unwrap()
    }

    #[test]
    fn test_weights_normalized_after_step() {
        let mut pf = scalar_model_filter(200, 11);
        let u = DVector::zeros(0);
        for t in 0..10 {
            let y = DVector::from_element(1, (t as f64 * 0.5).sin());
            pf.step(&u, &y).unwrap();
            let total: f64 = pf.expweights().iter().sum();
            assert!((total - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_impossible_observation_degenerates() {
        let likelihood =
            |_x: &DVector<f64>, _u: &DVector<f64>, _y: &DVector<f64>, _t: usize| {
                f64::NEG_INFINITY
            };
        let dynamics = |_rng: &mut dyn RngCore,
                        x: &DVector<f64>,
                        _u: &DVector<f64>,
                        _t: usize,
                        _noise: bool| x.clone();
        let measurement = |_rng: &mut dyn RngCore,
                           x: &DVector<f64>,
                           _u: &DVector<f64>,
                           _t: usize,
                           _noise: bool| x.clone();
        let mut pf = AdvancedParticleFilter::new(
            20,
            dynamics,
            measurement,
            likelihood,
            crate::distribution::DiagGaussian::isotropic(1, 1.0).unwrap(),
            0,
            1,
            FilterConfig::seeded(1),
        )
        .unwrap();
        let err = pf.correct(&DVector::zeros(1), &DVector::zeros(0));
        assert!(matches!(err, Err(FilterError::DegenerateWeights { .. })));
        // Weights restored: a possible observation still works afterwards.
    }

    #[test]
    fn test_deterministic_under_seed() {
        let mut a = scalar_model_filter(100, 33);
        let mut b = scalar_model_filter(100, 33);
        let u = DVector::zeros(0);
        for t in 0..12 {
            let y = DVector::from_element(1, (t as f64 * 0.3).cos());
            assert_eq!(a.step(&u, &y).unwrap(), b.step(&u, &y).unwrap());
        }
        assert_eq!(a.loglik(), b.loglik());
    }

    #[test]
    fn test_simulate_uses_model_noise() {
        let mut pf = scalar_model_filter(10, 4);
        let du = crate::distribution::TupleProduct((crate::distribution::Gaussian::new(
            0.0, 1.0,
        )
        .unwrap(),));
        // Control dimension is zero for this model.
        let sim = pf.simulate(5, &du);
        assert!(sim.is_err());
    }
}
