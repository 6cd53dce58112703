//! Linear-Gaussian Kalman filter

use std::borrow::Cow;
use std::fmt;

use nalgebra::{DMatrix, DVector};

use super::{check_dim, Filter};
use crate::distribution::{Density, MvGaussian};
use crate::error::FilterError;
use crate::rng::FilterRng;
use crate::trajectory::Simulation;

const LOG_2PI: f64 = 1.8378770664093453; // ln(2π)

/// A system coefficient matrix: constant, or a callable of the time index.
pub enum Coeff {
    /// Fixed matrix.
    Constant(DMatrix<f64>),
    /// Time-varying matrix `t -> M(t)`. Must return the same shape at every
    /// `t`.
    TimeVarying(Box<dyn Fn(usize) -> DMatrix<f64> + Send + Sync>),
}

impl Coeff {
    /// Wrap a time-varying coefficient callable.
    pub fn time_varying<F>(f: F) -> Self
    where
        F: Fn(usize) -> DMatrix<f64> + Send + Sync + 'static,
    {
        Coeff::TimeVarying(Box::new(f))
    }

    /// Evaluate at time `t`. Constant coefficients are borrowed, not cloned.
    pub fn at(&self, t: usize) -> Cow<'_, DMatrix<f64>> {
        match self {
            Coeff::Constant(m) => Cow::Borrowed(m),
            Coeff::TimeVarying(f) => Cow::Owned(f(t)),
        }
    }

    fn shape(&self) -> (usize, usize) {
        match self {
            Coeff::Constant(m) => (m.nrows(), m.ncols()),
            Coeff::TimeVarying(f) => {
                let m = f(0);
                (m.nrows(), m.ncols())
            }
        }
    }
}

impl From<DMatrix<f64>> for Coeff {
    fn from(m: DMatrix<f64>) -> Self {
        Coeff::Constant(m)
    }
}

impl fmt::Debug for Coeff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coeff::Constant(m) => write!(f, "Coeff::Constant({}x{})", m.nrows(), m.ncols()),
            Coeff::TimeVarying(_) => write!(f, "Coeff::TimeVarying"),
        }
    }
}

/// Kalman filter for `x' = A x + B u + w`, `y = C x + D u + v` with
/// `w ~ N(0, Q)` and `v ~ N(0, R)`.
///
/// `A`, `B`, `C`, `D` may each be constant or time-varying ([`Coeff`]). The
/// belief covariance is re-symmetrized after every update. The Kalman gain is
/// solved through a Cholesky factorization of the innovation covariance,
/// with an LU fallback when the factorization fails.
pub struct KalmanFilter {
    a: Coeff,
    b: Coeff,
    c: Coeff,
    d: Coeff,
    df: MvGaussian,
    dg: MvGaussian,
    d0: MvGaussian,
    x: DVector<f64>,
    r: DMatrix<f64>,
    rng: FilterRng,
    t: usize,
    loglik: f64,
    nx: usize,
    nu: usize,
    ny: usize,
}

impl KalmanFilter {
    /// Create a filter from system matrices, noise covariances `q` (process)
    /// and `r` (measurement), and the initial-state distribution `d0`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        a: impl Into<Coeff>,
        b: impl Into<Coeff>,
        c: impl Into<Coeff>,
        d: impl Into<Coeff>,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        d0: MvGaussian,
    ) -> Result<Self, FilterError> {
        let (a, b, c, d) = (a.into(), b.into(), c.into(), d.into());
        let nx = d0.dim();
        let (ar, ac) = a.shape();
        if ar != nx || ac != nx {
            return Err(FilterError::Configuration {
                description: format!("A must be {}x{}, got {}x{}", nx, nx, ar, ac),
            });
        }
        let (br, nu) = b.shape();
        if br != nx {
            return Err(FilterError::Configuration {
                description: format!("B must have {} rows, got {}", nx, br),
            });
        }
        let (ny, cc) = c.shape();
        if cc != nx {
            return Err(FilterError::Configuration {
                description: format!("C must have {} columns, got {}", nx, cc),
            });
        }
        let (dr, dc) = d.shape();
        if dr != ny || dc != nu {
            return Err(FilterError::Configuration {
                description: format!("D must be {}x{}, got {}x{}", ny, nu, dr, dc),
            });
        }
        let df = MvGaussian::new(DVector::zeros(nx), q)?;
        let dg = MvGaussian::new(DVector::zeros(ny), r)?;
        let x = d0.mean().clone();
        let r0 = d0.cov().clone();
        Ok(Self {
            a,
            b,
            c,
            d,
            df,
            dg,
            d0,
            x,
            r: r0,
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

    pub(crate) fn transition_at(&self, t: usize) -> Cow<'_, DMatrix<f64>> {
        self.a.at(t)
    }

    fn symmetrize(r: &mut DMatrix<f64>) {
        let rt = r.transpose();
        *r += rt;
        *r *= 0.5;
    }
}

impl Filter for KalmanFilter {
    fn predict(&mut self, u: &DVector<f64>) -> Result<(), FilterError> {
        check_dim(self.nu, u.len(), "control input")?;
        let a = self.a.at(self.t);
        let b = self.b.at(self.t);
        self.x = &*a * &self.x + &*b * u;
        self.r = &*a * &self.r * a.transpose() + self.df.cov();
        Self::symmetrize(&mut self.r);
        self.t += 1;
        Ok(())
    }

    fn correct(&mut self, y: &DVector<f64>, u: &DVector<f64>) -> Result<f64, FilterError> {
        check_dim(self.ny, y.len(), "measurement")?;
        check_dim(self.nu, u.len(), "control input")?;
        let c = self.c.at(self.t);
        let d = self.d.at(self.t);

        let e = y - &*c * &self.x - &*d * u;
        let cr = &*c * &self.r;
        let mut s = &cr * c.transpose() + self.dg.cov();
        Self::symmetrize(&mut s);

        // Gain K = R Cᵀ S⁻¹ = (S⁻¹ C R)ᵀ, solved rather than inverted.
        let (gain, mahalanobis, logdet) = match s.clone().cholesky() {
            Some(chol) => {
                let solved = chol.solve(&cr);
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
                let solved = lu.solve(&cr).ok_or_else(|| FilterError::SingularInnovation {
                    context: format!("innovation covariance at t={}", self.t),
                })?;
                let e_solved = lu.solve(&e).ok_or_else(|| FilterError::SingularInnovation {
                    context: format!("innovation covariance at t={}", self.t),
                })?;
                (solved.transpose(), e.dot(&e_solved), det.ln())
            }
        };

        self.x += &gain * &e;
        let ikc = DMatrix::identity(self.nx, self.nx) - &gain * &*c;
        self.r = ikc * &self.r;
        Self::symmetrize(&mut self.r);

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
        let c = self.c.at(self.t);
        let d = self.d.at(self.t);
        let noise = self.dg.sample(&mut self.rng);
        Ok(&*c * &self.x + &*d * u + noise)
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
            let c = self.c.at(t);
            let d = self.d.at(t);
            let y = &*c * &x + &*d * &u + self.dg.sample(&mut self.rng);
            let a = self.a.at(t);
            let b = self.b.at(t);
            let next = &*a * &x + &*b * &u + self.df.sample(&mut self.rng);
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
