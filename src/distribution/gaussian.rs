//! Gaussian families
//!
//! The multivariate form caches the Cholesky factor of its covariance at
//! construction so that both sampling (triangular multiply) and log-density
//! (triangular solve) avoid repeated factorizations.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::RngCore;
use rand_distr::{Distribution, Normal, StandardNormal};

use super::{Density, UnivariateDensity};
use crate::error::FilterError;

const LOG_2PI: f64 = 1.8378770664093453; // ln(2π)

/// Univariate normal distribution.
#[derive(Debug, Clone, Copy)]
pub struct Gaussian {
    mean: f64,
    std: f64,
    normal: Normal<f64>,
}

impl Gaussian {
    /// Create a normal with the given mean and standard deviation.
    pub fn new(mean: f64, std: f64) -> Result<Self, FilterError> {
        if !(std > 0.0 && std.is_finite() && mean.is_finite()) {
            return Err(FilterError::Configuration {
                description: format!("invalid Gaussian parameters: mean {}, std {}", mean, std),
            });
        }
        Ok(Self {
            mean,
            std,
            // Parameters validated above.
            normal: Normal::new(mean, std).unwrap(),
        })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }
}

impl Density for Gaussian {
    type Value = f64;

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.normal.sample(rng)
    }

    fn logpdf(&self, x: &f64) -> f64 {
        let z = (x - self.mean) / self.std;
        -0.5 * (LOG_2PI + z * z) - self.std.ln()
    }
}

impl UnivariateDensity for Gaussian {
    fn sample_scalar(&self, rng: &mut dyn RngCore) -> f64 {
        self.normal.sample(rng)
    }

    fn logpdf_scalar(&self, x: f64) -> f64 {
        self.logpdf(&x)
    }
}

/// Multivariate normal with full covariance.
#[derive(Debug, Clone)]
pub struct MvGaussian {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
    logdet: f64,
}

impl MvGaussian {
    /// Create from a mean vector and a symmetric positive-definite
    /// covariance matrix.
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self, FilterError> {
        let n = mean.len();
        if cov.nrows() != n || cov.ncols() != n {
            return Err(FilterError::Configuration {
                description: format!(
                    "covariance is {}x{} but mean has dimension {}",
                    cov.nrows(),
                    cov.ncols(),
                    n
                ),
            });
        }
        let chol = cov.clone().cholesky().ok_or_else(|| FilterError::Configuration {
            description: "covariance matrix is not positive definite".to_string(),
        })?;
        let logdet = 2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        Ok(Self {
            mean,
            cov,
            chol,
            logdet,
        })
    }

    /// Isotropic normal `N(0, var·I)` in `dim` dimensions.
    pub fn isotropic(dim: usize, var: f64) -> Result<Self, FilterError> {
        Self::new(DVector::zeros(dim), DMatrix::identity(dim, dim) * var)
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }
}

impl Density for MvGaussian {
    type Value = DVector<f64>;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> DVector<f64> {
        let z = DVector::from_fn(self.mean.len(), |_, _| StandardNormal.sample(rng));
        &self.mean + self.chol.l() * z
    }

    fn logpdf(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        let solved = self.chol.solve(&diff);
        let mahalanobis = diff.dot(&solved);
        -0.5 * (self.mean.len() as f64 * LOG_2PI + self.logdet + mahalanobis)
    }
}

/// Multivariate normal with diagonal covariance, stored as per-axis
/// standard deviations. Cheaper than [`MvGaussian`] in the particle hot loop.
#[derive(Debug, Clone)]
pub struct DiagGaussian {
    mean: DVector<f64>,
    std: DVector<f64>,
}

impl DiagGaussian {
    /// Create from a mean vector and per-axis standard deviations.
    pub fn new(mean: DVector<f64>, std: DVector<f64>) -> Result<Self, FilterError> {
        if mean.len() != std.len() {
            return Err(FilterError::Configuration {
                description: format!(
                    "mean has dimension {} but std has dimension {}",
                    mean.len(),
                    std.len()
                ),
            });
        }
        if std.iter().any(|s| !(*s > 0.0 && s.is_finite())) {
            return Err(FilterError::Configuration {
                description: "standard deviations must be positive and finite".to_string(),
            });
        }
        Ok(Self { mean, std })
    }

    /// Isotropic normal `N(0, std²·I)` in `dim` dimensions.
    pub fn isotropic(dim: usize, std: f64) -> Result<Self, FilterError> {
        Self::new(DVector::zeros(dim), DVector::from_element(dim, std))
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Covariance matrix materialized from the diagonal.
    pub fn cov(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.std.map(|s| s * s))
    }
}

impl Density for DiagGaussian {
    type Value = DVector<f64>;

    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> DVector<f64> {
        DVector::from_fn(self.mean.len(), |i, _| {
            let z: f64 = StandardNormal.sample(rng);
            self.mean[i] + self.std[i] * z
        })
    }

    fn logpdf(&self, x: &DVector<f64>) -> f64 {
        let mut lp = -0.5 * self.mean.len() as f64 * LOG_2PI;
        for i in 0..self.mean.len() {
            let z = (x[i] - self.mean[i]) / self.std[i];
            lp -= 0.5 * z * z + self.std[i].ln();
        }
        lp
    }
}
