//! Filter stepping benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::{DMatrix, DVector};
use sequor::distribution::{DiagGaussian, MvGaussian};
use sequor::filter::{Filter, FilterConfig, KalmanFilter, ParticleFilter};

fn particle_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("particle_filter");
    for &n in &[100usize, 1_000, 10_000] {
        let mut pf = ParticleFilter::new(
            n,
            |x: &DVector<f64>, u: &DVector<f64>, _t: usize| x * 0.9 + u,
            |x: &DVector<f64>, _u: &DVector<f64>, _t: usize| x.clone(),
            DiagGaussian::isotropic(4, 1.0).unwrap(),
            DiagGaussian::isotropic(4, 1.0).unwrap(),
            DiagGaussian::isotropic(4, 2.0).unwrap(),
            4,
            FilterConfig::seeded(42),
        )
        .unwrap();
        let u = DVector::zeros(4);
        let y = DVector::from_vec(vec![0.5, -0.5, 0.1, 0.0]);
        group.bench_function(format!("step_n{}", n), |b| {
            b.iter(|| {
                let ll = pf.step(black_box(&u), black_box(&y)).unwrap();
                black_box(ll)
            })
        });
    }
    group.finish();
}

fn kalman_step(c: &mut Criterion) {
    let mut kf = KalmanFilter::new(
        DMatrix::identity(4, 4) * 0.9,
        DMatrix::identity(4, 4),
        DMatrix::identity(4, 4),
        DMatrix::zeros(4, 4),
        DMatrix::identity(4, 4),
        DMatrix::identity(4, 4),
        MvGaussian::isotropic(4, 4.0).unwrap(),
    )
    .unwrap()
    .with_seed(42);
    let u = DVector::zeros(4);
    let y = DVector::from_vec(vec![0.5, -0.5, 0.1, 0.0]);
    c.bench_function("kalman_step", |b| {
        b.iter(|| {
            let ll = kf.step(black_box(&u), black_box(&y)).unwrap();
            black_box(ll)
        })
    });
}

criterion_group!(benches, particle_step, kalman_step);
criterion_main!(benches);
