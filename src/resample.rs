//! Systematic resampling
//!
//! Replaces a weighted particle set with an equally weighted one drawn with
//! replacement proportional to the weights, using a single uniform draw and a
//! deterministic `1/N` grid. Low variance compared to multinomial resampling,
//! and every draw costs one pass over the cumulative weights.

use rand::Rng;
use rand::RngCore;

/// Default ESS fraction below which resampling is triggered.
pub const DEFAULT_RESAMPLE_THRESHOLD: f64 = 0.5;

/// Whether to resample given the current effective sample size.
#[inline]
pub fn resampling_needed(ess: f64, n: usize, threshold: f64) -> bool {
    ess < threshold * n as f64
}

/// Systematic resampling with an explicit uniform offset `u0 ∈ [0, 1/N)`.
///
/// Writes into `indices` the ancestor index for each of the `N` output
/// particles: for grid point `u0 + k/N` the emitted index is the first whose
/// cumulative normalized weight reaches it. Output is a
/// permutation-with-repetition of `0..N`, sorted ascending.
pub fn systematic_indices_from(u0: f64, weights: &[f64], indices: &mut [usize]) {
    let n = weights.len();
    debug_assert_eq!(indices.len(), n);
    let step = 1.0 / n as f64;
    let mut cumsum = weights[0];
    let mut i = 0;
    for (k, slot) in indices.iter_mut().enumerate() {
        let position = u0 + k as f64 * step;
        while cumsum < position && i + 1 < n {
            i += 1;
            cumsum += weights[i];
        }
        *slot = i;
    }
}

/// Systematic resampling with the offset drawn from the supplied generator.
pub fn systematic_indices(rng: &mut dyn RngCore, weights: &[f64], indices: &mut [usize]) {
    let u0 = rng.gen::<f64>() / weights.len() as f64;
    systematic_indices_from(u0, weights, indices);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::FilterRng;

    #[test]
    fn test_reference_draw() {
        // Weights [0.1, 0.1, 0.1, 0.7] with u0 = 0.1 must select [0, 3, 3, 3]:
        // grid points 0.1, 0.35, 0.6, 0.85 against cumsum 0.1, 0.2, 0.3, 1.0.
        let weights = [0.1, 0.1, 0.1, 0.7];
        let mut idx = [0usize; 4];
        systematic_indices_from(0.1, &weights, &mut idx);
        assert_eq!(idx, [0, 3, 3, 3]);
    }

    #[test]
    fn test_uniform_weights_identity() {
        let n = 8;
        let weights = vec![1.0 / n as f64; n];
        let mut idx = vec![0usize; n];
        systematic_indices_from(0.02, &weights, &mut idx);
        let expected: Vec<usize> = (0..n).collect();
        assert_eq!(idx, expected);
    }

    #[test]
    fn test_output_sorted_and_in_range() {
        let mut rng = FilterRng::from_seed(11);
        let weights = [0.05, 0.2, 0.05, 0.3, 0.4];
        let mut idx = [0usize; 5];
        for _ in 0..100 {
            systematic_indices(&mut rng, &weights, &mut idx);
            assert!(idx.windows(2).all(|w| w[0] <= w[1]));
            assert!(idx.iter().all(|&i| i < 5));
        }
    }

    #[test]
    fn test_unbiasedness() {
        // Expected copy count of particle i over repeated draws is N * w_i.
        let mut rng = FilterRng::from_seed(99);
        let weights = [0.1, 0.2, 0.3, 0.4];
        let n = weights.len();
        let trials = 20_000;
        let mut counts = [0u64; 4];
        let mut idx = [0usize; 4];
        for _ in 0..trials {
            systematic_indices(&mut rng, &weights, &mut idx);
            for &i in &idx {
                counts[i] += 1;
            }
        }
        for i in 0..n {
            let mean_copies = counts[i] as f64 / trials as f64;
            let expected = n as f64 * weights[i];
            assert!(
                (mean_copies - expected).abs() < 0.02,
                "particle {}: {} copies vs expected {}",
                i,
                mean_copies,
                expected
            );
        }
    }

    #[test]
    fn test_trigger() {
        assert!(resampling_needed(40.0, 100, 0.5));
        assert!(!resampling_needed(60.0, 100, 0.5));
        assert!(!resampling_needed(50.0, 100, 0.5));
    }
}
