//! Log-space particle weights
//!
//! Weights are kept in log-space at all times; the exponentiated form is a
//! derived view recomputed on demand. Every log-sum-exp subtracts the running
//! maximum before exponentiation so that peaked likelihoods do not underflow.

use crate::error::FilterError;

/// Log-weight vector with a preallocated exponentiated view.
///
/// Between public filter operations the weights are normalized, i.e.
/// `logsumexp(w) = 0`. Uniform weights are stored as `-ln N`.
#[derive(Debug, Clone)]
pub struct LogWeights {
    logw: Vec<f64>,
    expw: Vec<f64>,
    /// Restore buffer so a failed correction does not commit partial state.
    saved: Vec<f64>,
}

/// Numerically stable `log(sum(exp(values)))`.
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

impl LogWeights {
    /// Create `n` uniform log-weights at `-ln n`.
    pub fn uniform(n: usize) -> Self {
        let w = -(n as f64).ln();
        Self {
            logw: vec![w; n],
            expw: vec![1.0 / n as f64; n],
            saved: vec![w; n],
        }
    }

    pub fn len(&self) -> usize {
        self.logw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logw.is_empty()
    }

    /// Log-weights, normalized so `logsumexp = 0`.
    pub fn log_weights(&self) -> &[f64] {
        &self.logw
    }

    /// Reset every weight to `-ln n`.
    pub fn fill_uniform(&mut self) {
        let w = -(self.logw.len() as f64).ln();
        self.logw.iter_mut().for_each(|x| *x = w);
    }

    /// Pointwise add log-density contributions.
    pub fn add_logweights<F>(&mut self, mut delta: F)
    where
        F: FnMut(usize) -> f64,
    {
        for (i, w) in self.logw.iter_mut().enumerate() {
            *w += delta(i);
        }
    }

    /// Snapshot the current weights so a failed update can be rolled back.
    pub fn save(&mut self) {
        self.saved.copy_from_slice(&self.logw);
    }

    /// Restore the last snapshot.
    pub fn restore(&mut self) {
        self.logw.copy_from_slice(&self.saved);
    }

    /// Subtract `logsumexp` so the weights normalize to one, returning the
    /// pre-normalization `logsumexp` (the step log-likelihood increment).
    ///
    /// Fails with [`FilterError::DegenerateWeights`] when every weight is
    /// `-inf` or any weight is NaN/+inf; `timestep` is only used to label
    /// the error.
    pub fn normalize(&mut self, timestep: usize) -> Result<f64, FilterError> {
        if self.logw.iter().any(|w| w.is_nan() || *w == f64::INFINITY) {
            return Err(FilterError::DegenerateWeights { timestep });
        }
        let lse = logsumexp(&self.logw);
        if !lse.is_finite() {
            return Err(FilterError::DegenerateWeights { timestep });
        }
        self.logw.iter_mut().for_each(|w| *w -= lse);
        Ok(lse)
    }

    /// Effective sample size `1 / Σ wᵢ²` of the normalized weights.
    /// Always in `[1, N]`; equals `N` iff the weights are uniform.
    pub fn ess(&self) -> f64 {
        let sum_sq: f64 = self.logw.iter().map(|w| (2.0 * w).exp()).sum();
        1.0 / sum_sq
    }

    /// Materialize `exp(wᵢ)` into the internal buffer and return it.
    pub fn expweights(&mut self) -> &[f64] {
        for (e, w) in self.expw.iter_mut().zip(self.logw.iter()) {
            *e = w.exp();
        }
        &self.expw
    }
}
