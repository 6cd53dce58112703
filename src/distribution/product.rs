//! Heterogeneous product distribution
//!
//! Composes a tuple of independent univariate distributions, possibly of
//! mixed continuous/discrete support, into a joint over `DVector<f64>`.
//! The arity is known at compile time and every component call is statically
//! dispatched; no boxing in the sampling or density paths.

use nalgebra::DVector;
use rand::RngCore;

use super::{Density, UnivariateDensity};

/// Product of independent univariate components.
///
/// The joint log-density is the sum of component log-densities and a sample
/// is the vector of component samples, in tuple order.
///
/// ```
/// use sequor::distribution::{Categorical, Density, Gaussian, TupleProduct};
///
/// let prior = TupleProduct((
///     Gaussian::new(0.0, 1.0).unwrap(),
///     Categorical::new(&[0.5, 0.5]).unwrap(),
/// ));
/// assert_eq!(prior.dim(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct TupleProduct<T>(pub T);

macro_rules! impl_tuple_product {
    ($arity:expr; $($ty:ident . $idx:tt),+) => {
        impl<$($ty: UnivariateDensity),+> Density for TupleProduct<($($ty,)+)> {
            type Value = DVector<f64>;

            fn dim(&self) -> usize {
                $arity
            }

            fn sample(&self, rng: &mut dyn RngCore) -> DVector<f64> {
                DVector::from_vec(vec![$((self.0).$idx.sample_scalar(rng)),+])
            }

            fn logpdf(&self, x: &DVector<f64>) -> f64 {
                if x.len() != $arity {
                    return f64::NEG_INFINITY;
                }
                let mut lp = 0.0;
                $(lp += (self.0).$idx.logpdf_scalar(x[$idx]);)+
                lp
            }
        }
    };
}

impl_tuple_product!(1; A.0);
impl_tuple_product!(2; A.0, B.1);
impl_tuple_product!(3; A.0, B.1, C.2);
impl_tuple_product!(4; A.0, B.1, C.2, D.3);
impl_tuple_product!(5; A.0, B.1, C.2, D.3, E.4);
impl_tuple_product!(6; A.0, B.1, C.2, D.3, E.4, F.5);
impl_tuple_product!(7; A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_tuple_product!(8; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{Categorical, Gaussian};
    use crate::rng::FilterRng;

    #[test]
    fn test_logpdf_is_sum_of_components() {
        let g0 = Gaussian::new(0.0, 1.0).unwrap();
        let g1 = Gaussian::new(2.0, 0.5).unwrap();
        let joint = TupleProduct((g0, g1));

        let x = DVector::from_vec(vec![0.3, 1.7]);
        let expected = g0.logpdf(&0.3) + g1.logpdf(&1.7);
        assert!((joint.logpdf(&x) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_support() {
        let joint = TupleProduct((
            Gaussian::new(0.0, 1.0).unwrap(),
            Categorical::new(&[0.25, 0.75]).unwrap(),
        ));
        assert_eq!(joint.dim(), 2);

        let mut rng = FilterRng::from_seed(8);
        let s = joint.sample(&mut rng);
        assert_eq!(s.len(), 2);
        assert!(s[1] == 0.0 || s[1] == 1.0);

        let lp = joint.logpdf(&DVector::from_vec(vec![0.0, 1.0]));
        assert!(lp.is_finite());
        // Non-integer value in the discrete slot is impossible.
        let lp = joint.logpdf(&DVector::from_vec(vec![0.0, 0.4]));
        assert_eq!(lp, f64::NEG_INFINITY);
    }

    #[test]
    fn test_wrong_dimension() {
        let joint = TupleProduct((Gaussian::new(0.0, 1.0).unwrap(),));
        assert_eq!(joint.logpdf(&DVector::from_vec(vec![0.0, 0.0])), f64::NEG_INFINITY);
    }
}
