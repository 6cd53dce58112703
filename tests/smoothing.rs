//! Particle smoother against the Rauch-Tung-Striebel reference
//!
//! On a linear Gaussian system the FFBS smoothed mean must agree with the
//! RTS smoothed mean up to Monte Carlo error. The default test runs a
//! reduced configuration; the full-size configuration is `#[ignore]`d and
//! run on demand.

use nalgebra::{DMatrix, DVector};
use sequor::distribution::{DiagGaussian, MvGaussian};
use sequor::filter::{Filter, FilterConfig, KalmanFilter, ParticleFilter};
use sequor::smooth::{smooth_ffbs, smooth_rts};
use sequor::trajectory::forward_trajectory;

fn scalar_kalman(seed: u64) -> KalmanFilter {
    KalmanFilter::new(
        DMatrix::from_element(1, 1, 0.9),
        DMatrix::identity(1, 1),
        DMatrix::identity(1, 1),
        DMatrix::zeros(1, 1),
        DMatrix::identity(1, 1),
        DMatrix::identity(1, 1),
        MvGaussian::isotropic(1, 4.0).unwrap(),
    )
    .unwrap()
    .with_seed(seed)
}

fn scalar_particle(
    n: usize,
    seed: u64,
) -> ParticleFilter<
    impl sequor::Dynamics,
    impl sequor::Measurement,
    DiagGaussian,
    DiagGaussian,
    DiagGaussian,
> {
    ParticleFilter::new(
        n,
        |x: &DVector<f64>, u: &DVector<f64>, _t: usize| x * 0.9 + u,
        |x: &DVector<f64>, _u: &DVector<f64>, _t: usize| x.clone(),
        DiagGaussian::isotropic(1, 1.0).unwrap(),
        DiagGaussian::isotropic(1, 1.0).unwrap(),
        DiagGaussian::isotropic(1, 2.0).unwrap(),
        1,
        FilterConfig::seeded(seed),
    )
    .unwrap()
}

fn compare_ffbs_to_rts(steps: usize, n: usize, m: usize, tolerance: f64) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kf = scalar_kalman(42);
    let du = MvGaussian::isotropic(1, 1.0).unwrap();
    let sim = kf.simulate(steps, &du).unwrap();

    let rts = smooth_rts(&mut kf, &sim.u, &sim.y).unwrap();

    let mut pf = scalar_particle(n, 42);
    let ffbs = smooth_ffbs(&mut pf, m, &sim.u, &sim.y).unwrap();
    let ffbs_mean = ffbs.smoothed_mean();

    for t in 0..steps {
        let dev = (ffbs_mean[t][0] - rts.means[t][0]).abs();
        assert!(
            dev < tolerance,
            "FFBS mean deviates {} from RTS at t={}",
            dev,
            t
        );
    }
}

#[test]
fn ffbs_matches_rts_reduced() {
    compare_ffbs_to_rts(20, 2_000, 300, 0.15);
}

/// Full-size configuration. Slow; run with `cargo test -- --ignored`.
#[test]
#[ignore]
fn ffbs_matches_rts_full() {
    compare_ffbs_to_rts(50, 2_000, 500, 0.05);
}

#[test]
fn rts_endpoint_equals_filtered_belief() {
    let mut kf = scalar_kalman(11);
    let du = MvGaussian::isotropic(1, 1.0).unwrap();
    let sim = kf.simulate(40, &du).unwrap();
    let rts = smooth_rts(&mut kf, &sim.u, &sim.y).unwrap();
    let forward = forward_trajectory(&mut kf, &sim.u, &sim.y).unwrap();
    let last = sim.y.len() - 1;
    assert!((rts.means[last][0] - forward.corrections[last].mean[0]).abs() < 1e-12);
    assert!((rts.covs[last][(0, 0)] - forward.corrections[last].cov[(0, 0)]).abs() < 1e-12);
}

#[test]
fn smoothed_covariance_shrinks_in_the_interior() {
    let mut kf = scalar_kalman(13);
    let du = MvGaussian::isotropic(1, 1.0).unwrap();
    let sim = kf.simulate(40, &du).unwrap();
    let rts = smooth_rts(&mut kf, &sim.u, &sim.y).unwrap();
    let forward = forward_trajectory(&mut kf, &sim.u, &sim.y).unwrap();
    for t in 0..sim.y.len() - 1 {
        assert!(
            rts.covs[t][(0, 0)] < forward.corrections[t].cov[(0, 0)] + 1e-12,
            "no variance reduction at t={}",
            t
        );
    }
}

#[test]
fn ffbs_trajectories_have_consistent_shape() {
    let mut pf = scalar_particle(500, 5);
    let du = DiagGaussian::isotropic(1, 1.0).unwrap();
    let sim = pf.simulate(15, &du).unwrap();
    let ffbs = smooth_ffbs(&mut pf, 50, &sim.u, &sim.y).unwrap();
    assert_eq!(ffbs.num_trajectories(), 50);
    assert!(ffbs
        .smoothed_trajs()
        .iter()
        .all(|traj| traj.len() == 15 && traj.iter().all(|x| x.len() == 1)));
    assert_eq!(ffbs.smoothed_cov().len(), 15);
    assert!(ffbs.loglik().is_finite());
}
