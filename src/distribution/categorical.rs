//! Discrete categorical distribution

use rand::{Rng, RngCore};

use super::{Density, UnivariateDensity};
use crate::error::FilterError;

/// Discrete distribution over indices `0..k` with given probabilities.
///
/// Probabilities are normalized at construction; sampling walks the cached
/// cumulative sum with a single uniform draw.
#[derive(Debug, Clone)]
pub struct Categorical {
    probs: Vec<f64>,
    cumulative: Vec<f64>,
}

impl Categorical {
    /// Create from (possibly unnormalized) nonnegative weights.
    pub fn new(weights: &[f64]) -> Result<Self, FilterError> {
        if weights.is_empty() {
            return Err(FilterError::Configuration {
                description: "categorical distribution needs at least one category".to_string(),
            });
        }
        if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
            return Err(FilterError::Configuration {
                description: "categorical weights must be finite and nonnegative".to_string(),
            });
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(FilterError::Configuration {
                description: "categorical weights must not all be zero".to_string(),
            });
        }
        let probs: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let mut cumulative = Vec::with_capacity(probs.len());
        let mut acc = 0.0;
        for p in &probs {
            acc += p;
            cumulative.push(acc);
        }
        // Guard the tail against rounding so sampling never walks off the end.
        *cumulative.last_mut().unwrap() = 1.0;
        Ok(Self { probs, cumulative })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// Normalized probabilities.
    pub fn probs(&self) -> &[f64] {
        &self.probs
    }
}

impl Density for Categorical {
    type Value = usize;

    fn sample(&self, rng: &mut dyn RngCore) -> usize {
        let u: f64 = rng.gen();
        match self
            .cumulative
            .iter()
            .position(|&c| c >= u)
        {
            Some(i) => i,
            None => self.probs.len() - 1,
        }
    }

    fn logpdf(&self, x: &usize) -> f64 {
        match self.probs.get(*x) {
            Some(&p) if p > 0.0 => p.ln(),
            _ => f64::NEG_INFINITY,
        }
    }
}

impl UnivariateDensity for Categorical {
    fn sample_scalar(&self, rng: &mut dyn RngCore) -> f64 {
        Density::sample(self, rng) as f64
    }

    fn logpdf_scalar(&self, x: f64) -> f64 {
        if x.fract() != 0.0 || x < 0.0 {
            return f64::NEG_INFINITY;
        }
        self.logpdf(&(x as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FilterRng;

    #[test]
    fn test_normalization() {
        let d = Categorical::new(&[2.0, 2.0, 4.0]).unwrap();
        assert_eq!(d.probs(), &[0.25, 0.25, 0.5]);
    }

    #[test]
    fn test_sample_frequencies() {
        let d = Categorical::new(&[0.2, 0.3, 0.5]).unwrap();
        let mut rng = FilterRng::from_seed(4);
        let n = 30_000;
        let mut counts = [0usize; 3];
        for _ in 0..n {
            counts[Density::sample(&d, &mut rng)] += 1;
        }
        for (i, &p) in d.probs().iter().enumerate() {
            let freq = counts[i] as f64 / n as f64;
            assert!((freq - p).abs() < 0.01, "category {}: {} vs {}", i, freq, p);
        }
    }

    #[test]
    fn test_logpdf() {
        let d = Categorical::new(&[0.5, 0.5, 0.0]).unwrap();
        assert!((d.logpdf(&0) - 0.5f64.ln()).abs() < 1e-12);
        assert_eq!(d.logpdf(&2), f64::NEG_INFINITY);
        assert_eq!(d.logpdf(&9), f64::NEG_INFINITY);
        assert_eq!(d.logpdf_scalar(0.5), f64::NEG_INFINITY);
    }

    #[test]
    fn test_invalid_weights() {
        assert!(Categorical::new(&[]).is_err());
        assert!(Categorical::new(&[1.0, -0.5]).is_err());
        assert!(Categorical::new(&[0.0, 0.0]).is_err());
    }
}
