//! Auxiliary particle filter

use nalgebra::{DMatrix, DVector};

use super::{Filter, ParticleFilter};
use crate::distribution::Density;
use crate::error::FilterError;
use crate::model::{Dynamics, Measurement};
use crate::trajectory::Simulation;

/// Auxiliary (lookahead) particle filter wrapping a [`ParticleFilter`].
///
/// When the next measurement is available at prediction time, the filter
/// computes first-stage log-weights from each particle's deterministic
/// one-step prediction, resamples on `W + α`, propagates the chosen
/// ancestors with noise, and unwinds the parent `α` in the following
/// correction. This reduces weight variance when likelihoods are peaked.
/// Without a lookahead it behaves exactly like the wrapped filter.
pub struct AuxiliaryParticleFilter<F, G, DF, DG, D0> {
    pf: ParticleFilter<F, G, DF, DG, D0>,
    aux: Vec<f64>,
    parent_aux: Vec<f64>,
    aux_pending: bool,
    /// First-stage normalizer of the pending lookahead step; folded into
    /// the increment of the following correction.
    stage_ll: f64,
}

impl<F, G, DF, DG, D0> AuxiliaryParticleFilter<F, G, DF, DG, D0>
where
    F: Dynamics,
    G: Measurement,
    DF: Density<Value = DVector<f64>>,
    DG: Density<Value = DVector<f64>>,
    D0: Density<Value = DVector<f64>>,
{
    /// Wrap an existing particle filter.
    pub fn new(pf: ParticleFilter<F, G, DF, DG, D0>) -> Self {
        let n = pf.num_particles();
        Self {
            pf,
            aux: vec![0.0; n],
            parent_aux: vec![0.0; n],
            aux_pending: false,
            stage_ll: 0.0,
        }
    }

    /// The wrapped base filter.
    pub fn inner(&self) -> &ParticleFilter<F, G, DF, DG, D0> {
        &self.pf
    }

    /// Number of particles.
    pub fn num_particles(&self) -> usize {
        self.pf.num_particles()
    }

    /// Posterior mean under the current weights.
    pub fn weighted_mean(&self) -> DVector<f64> {
        self.pf.weighted_mean()
    }

    /// Posterior covariance under the current weights.
    pub fn weighted_cov(&self) -> DMatrix<f64> {
        self.pf.weighted_cov()
    }

    /// Exponentiated (linear-scale) weights.
    pub fn expweights(&mut self) -> &[f64] {
        self.pf.expweights()
    }

    /// Effective sample size of the current weights.
    pub fn ess(&self) -> f64 {
        self.pf.ess()
    }
}

impl<F, G, DF, DG, D0> Filter for AuxiliaryParticleFilter<F, G, DF, DG, D0>
where
    F: Dynamics,
    G: Measurement,
    DF: Density<Value = DVector<f64>>,
    DG: Density<Value = DVector<f64>>,
    D0: Density<Value = DVector<f64>>,
{
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        self.aux_pending = false;
        self.pf.predict(u)
    }

    fn predict_guided(
        &mut self,
        u: &DVector<f64>,
        y_next: Option<&DVector<f64>>,
    ) -> Result<(), FilterError> {
        let y_next = match y_next {
            Some(y) => y,
            None => return self.predict(u),
        };
        self.pf.lookahead_weights(u, y_next, &mut self.aux);
        self.stage_ll = self
            .pf
            .resample_propagate(u, &self.aux, &mut self.parent_aux)?;
        self.aux_pending = true;
        Ok(())
    }

    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError> {
        let offset = if self.aux_pending {
            Some(self.parent_aux.as_slice())
        } else {
            None
        };
        let increment = self.pf.correct_with_offset(y, u, offset)?;
        // The lookahead already absorbed part of this measurement's
        // evidence; fold its normalizer into the same step increment.
        let stage_ll = if self.aux_pending { self.stage_ll } else { 0.0 };
        self.pf.bump_loglik(stage_ll);
        self.aux_pending = false;
        self.stage_ll = 0.0;
        Ok(increment + stage_ll)
    }

    fn state(&self) -> DVector<f64> {
        self.pf.state()
    }

    fn covariance(&self) -> DMatrix<f64> {
        self.pf.covariance()
    }

    fn loglik(&self) -> f64 {
        self.pf.loglik()
    }

    fn timestep(&self) -> usize {
        self.pf.timestep()
    }

    fn reset(&mut self) {
        self.aux_pending = false;
        self.stage_ll = 0.0;
        self.pf.reset();
    }

    fn x_dim(&self) -> usize {
        self.pf.x_dim()
    }

    fn u_dim(&self) -> usize {
        self.pf.u_dim()
    }

    fn y_dim(&self) -> usize {
        self.pf.y_dim()
    }

    fn seed(&self) -> u64 {
        self.pf.seed()
    }

    fn sample_measurement(&mut self, u: &DVector<f64>) -> Result<DVector<f64>, FilterError> {
        self.pf.sample_measurement(u)
    }

    fn simulate(
        &mut self,
        steps: usize,
        du: &dyn Density<Value = DVector<f64>>,
    ) -> Result<Simulation, FilterError> {
        self.pf.simulate(steps, du)
    }

    fn particles(&self) -> Option<&[DVector<f64>]> {
        self.pf.particles()
    }

    fn log_weights(&self) -> Option<&[f64]> {
        self.pf.log_weights()
    }
}
