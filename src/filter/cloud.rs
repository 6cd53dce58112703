//! Shared particle-cloud state
//!
//! All three particle filters keep the same state layout: a current particle
//! buffer, an equal-shaped swap buffer so propagation never aliases and a
//! failed step never commits, the log-weight vector, and ancestor scratch
//! for resampling. The buffers are allocated once at construction.

use nalgebra::{DMatrix, DVector};
use rand::RngCore;

use crate::distribution::Density;
use crate::error::FilterError;
use crate::resample::systematic_indices;
use crate::weights::LogWeights;

#[derive(Debug, Clone)]
pub(crate) struct ParticleCloud {
    /// Current particle positions.
    pub x: Vec<DVector<f64>>,
    /// Previous-step / staging buffer of identical shape.
    pub staging: Vec<DVector<f64>>,
    /// Normalized log-weights.
    pub w: LogWeights,
    ancestors: Vec<usize>,
}

impl ParticleCloud {
    pub fn new(n: usize, nx: usize) -> Self {
        Self {
            x: vec![DVector::zeros(nx); n],
            staging: vec![DVector::zeros(nx); n],
            w: LogWeights::uniform(n),
            ancestors: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Redraw every particle from `d0` and reset the weights to uniform.
    pub fn init_from(&mut self, d0: &dyn Density<Value = DVector<f64>>, rng: &mut dyn RngCore) {
        for xi in self.x.iter_mut() {
            *xi = d0.sample(rng);
        }
        self.w.fill_uniform();
    }

    /// Posterior mean under the current weights.
    pub fn weighted_mean(&self) -> DVector<f64> {
        let nx = self.x[0].len();
        let mut mean = DVector::zeros(nx);
        for (xi, &lw) in self.x.iter().zip(self.w.log_weights()) {
            mean.axpy(lw.exp(), xi, 1.0);
        }
        mean
    }

    /// Posterior covariance under the current weights.
    pub fn weighted_cov(&self) -> DMatrix<f64> {
        let nx = self.x[0].len();
        let mean = self.weighted_mean();
        let mut cov = DMatrix::zeros(nx, nx);
        for (xi, &lw) in self.x.iter().zip(self.w.log_weights()) {
            let diff = xi - &mean;
            cov.syger(lw.exp(), &diff, &diff, 1.0);
        }
        // syger fills the lower triangle only; mirror it.
        cov.fill_upper_triangle_with_lower_triangle();
        cov
    }

    /// Systematically resample the cloud in place with the given extra
    /// first-stage log-weights added (used by the auxiliary filter; pass
    /// `None` for plain resampling). Weights become uniform; the chosen
    /// ancestors are readable through [`ParticleCloud::ancestors`].
    ///
    /// Returns the first-stage normalizer `log Σ wᵢ exp(auxᵢ)` (zero for
    /// plain resampling, where the weights are already normalized).
    pub fn resample(
        &mut self,
        rng: &mut dyn RngCore,
        aux: Option<&[f64]>,
        timestep: usize,
    ) -> Result<f64, FilterError> {
        let mut stage_ll = 0.0;
        if let Some(aux) = aux {
            self.w.save();
            self.w.add_logweights(|i| aux[i]);
            match self.w.normalize(timestep) {
                Ok(lse) => stage_ll = lse,
                Err(e) => {
                    self.w.restore();
                    return Err(e);
                }
            }
        }
        let weights = self.w.expweights();
        systematic_indices(rng, weights, &mut self.ancestors);
        for (slot, &a) in self.staging.iter_mut().zip(self.ancestors.iter()) {
            slot.copy_from(&self.x[a]);
        }
        std::mem::swap(&mut self.x, &mut self.staging);
        self.w.fill_uniform();
        Ok(stage_ll)
    }

    /// Ancestor indices chosen by the most recent resample.
    pub fn ancestors(&self) -> &[usize] {
        &self.ancestors
    }

    /// Commit a propagation staged in `staging` by swapping buffers.
    pub fn commit_staging(&mut self) {
        std::mem::swap(&mut self.x, &mut self.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::DiagGaussian;
    use crate::rng::FilterRng;

    #[test]
    fn test_init_shapes() {
        let mut cloud = ParticleCloud::new(50, 3);
        let d0 = DiagGaussian::isotropic(3, 1.0).unwrap();
        let mut rng = FilterRng::from_seed(0);
        cloud.init_from(&d0, &mut rng);
        assert_eq!(cloud.len(), 50);
        assert!(cloud.x.iter().all(|x| x.len() == 3));
        assert!((cloud.w.ess() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mean_uniform() {
        let mut cloud = ParticleCloud::new(2, 1);
        cloud.x[0][0] = 1.0;
        cloud.x[1][0] = 3.0;
        let mean = cloud.weighted_mean();
        assert!((mean[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_cov_symmetric() {
        let mut cloud = ParticleCloud::new(100, 2);
        let d0 = DiagGaussian::isotropic(2, 2.0).unwrap();
        let mut rng = FilterRng::from_seed(5);
        cloud.init_from(&d0, &mut rng);
        let cov = cloud.weighted_cov();
        for i in 0..2 {
            for j in 0..2 {
                assert!((cov[(i, j)] - cov[(j, i)]).abs() < 1e-12);
            }
        }
        // Variance of N(0, 4) estimated from 100 draws is in the right range.
        assert!(cov[(0, 0)] > 1.5 && cov[(0, 0)] < 7.5);
    }

    #[test]
    fn test_resample_uniformizes_weights() {
        let mut cloud = ParticleCloud::new(4, 1);
        for (i, x) in cloud.x.iter_mut().enumerate() {
            x[0] = i as f64;
        }
        // Concentrate all weight on the last particle.
        cloud.w.add_logweights(|i| if i == 3 { 0.0 } else { -1e3 });
        cloud.w.normalize(0).unwrap();
        let mut rng = FilterRng::from_seed(1);
        cloud.resample(&mut rng, None, 0).unwrap();
        assert!(cloud.x.iter().all(|x| x[0] == 3.0));
        assert!((cloud.w.ess() - 4.0).abs() < 1e-9);
    }
}
