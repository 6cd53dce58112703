//! User-supplied model callables
//!
//! Dynamics and measurement models are plain functions of
//! `(state, input, time)`. Model parameters such as transition matrices or
//! rate constants are captured by the callable itself (a closure or a struct
//! implementing the trait), so nothing reaches the library as global state.
//!
//! The advanced variants take an explicit generator and a `noise` flag so
//! user code can inject state-dependent or non-additive noise.

use nalgebra::DVector;
use rand::RngCore;

/// Deterministic state transition `x' = f(x, u, t)`.
///
/// Must return finite values; the filters reject NaN/infinite output with
/// [`crate::FilterError::NonFinite`].
pub trait Dynamics {
    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, t: usize) -> DVector<f64>;
}

impl<F> Dynamics for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, usize) -> DVector<f64>,
{
    fn step(&self, x: &DVector<f64>, u: &DVector<f64>, t: usize) -> DVector<f64> {
        self(x, u, t)
    }
}

/// Deterministic measurement map `ŷ = g(x, u, t)`.
pub trait Measurement {
    fn observe(&self, x: &DVector<f64>, u: &DVector<f64>, t: usize) -> DVector<f64>;
}

impl<F> Measurement for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, usize) -> DVector<f64>,
{
    fn observe(&self, x: &DVector<f64>, u: &DVector<f64>, t: usize) -> DVector<f64> {
        self(x, u, t)
    }
}

/// State transition with caller-controlled noise injection.
///
/// With `noise = false` the map must be deterministic; with `noise = true`
/// the implementation draws its own process noise from `rng`, which permits
/// state-dependent and non-additive noise models.
pub trait NoisyDynamics {
    fn step(
        &self,
        rng: &mut dyn RngCore,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
        noise: bool,
    ) -> DVector<f64>;
}

impl<F> NoisyDynamics for F
where
    F: Fn(&mut dyn RngCore, &DVector<f64>, &DVector<f64>, usize, bool) -> DVector<f64>,
{
    fn step(
        &self,
        rng: &mut dyn RngCore,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
        noise: bool,
    ) -> DVector<f64> {
        self(rng, x, u, t, noise)
    }
}

/// Measurement map with caller-controlled noise injection.
pub trait NoisyMeasurement {
    fn observe(
        &self,
        rng: &mut dyn RngCore,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
        noise: bool,
    ) -> DVector<f64>;
}

impl<F> NoisyMeasurement for F
where
    F: Fn(&mut dyn RngCore, &DVector<f64>, &DVector<f64>, usize, bool) -> DVector<f64>,
{
    fn observe(
        &self,
        rng: &mut dyn RngCore,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
        noise: bool,
    ) -> DVector<f64> {
        self(rng, x, u, t, noise)
    }
}

/// Direct measurement log-likelihood `log p(y | x, u, t)`.
///
/// Must return a finite value, or `-inf` for observations that are
/// impossible under the model.
pub trait MeasurementLikelihood {
    fn loglik(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, t: usize) -> f64;
}

impl<F> MeasurementLikelihood for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, &DVector<f64>, usize) -> f64,
{
    fn loglik(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, t: usize) -> f64 {
        self(x, u, y, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FilterRng;

    #[test]
    fn test_closure_dynamics() {
        let a = 0.9;
        let f = move |x: &DVector<f64>, u: &DVector<f64>, _t: usize| x * a + u;
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let u = DVector::from_vec(vec![0.1, 0.1]);
        let next = Dynamics::step(&f, &x, &u, 0);
        assert!((next[0] - 1.0).abs() < 1e-12);
        assert!((next[1] - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_closure_noisy_dynamics_deterministic_when_disabled() {
        let f = |_rng: &mut dyn RngCore, x: &DVector<f64>, _u: &DVector<f64>, _t: usize, noise: bool| {
            if noise {
                x * 2.0
            } else {
                x.clone()
            }
        };
        let mut rng = FilterRng::from_seed(1);
        let x = DVector::from_vec(vec![3.0]);
        let u = DVector::zeros(0);
        let out = NoisyDynamics::step(&f, &mut rng, &x, &u, 0, false);
        assert_eq!(out[0], 3.0);
        let out = NoisyDynamics::step(&f, &mut rng, &x, &u, 0, true);
        assert_eq!(out[0], 6.0);
    }

    #[test]
    fn test_closure_likelihood() {
        let g = |x: &DVector<f64>, _u: &DVector<f64>, y: &DVector<f64>, _t: usize| {
            -(y[0] - x[0]).abs()
        };
        let x = DVector::from_vec(vec![1.0]);
        let y = DVector::from_vec(vec![1.5]);
        assert!((MeasurementLikelihood::loglik(&g, &x, &DVector::zeros(0), &y, 0) + 0.5).abs() < 1e-12);
    }
}
