use ndarray::{ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::{Rng, distr::StandardUniform};
use rand_distr::StandardNormal;

use crate::tensor::Tensor;

/// The source of randomness threaded through every sampler call.
///
/// Implemented for every `rand::Rng`, so a seeded `StdRng` is a reproducible noise source. No
/// component of the crate reseeds it.
pub trait NoiseSource {
    /// Draws independent values uniformly distributed in `[0, 1)`, in row-major order.
    fn uniform(&mut self, shape: &[usize]) -> Tensor;

    /// Draws independent standard normal values, in row-major order.
    fn normal(&mut self, shape: &[usize]) -> Tensor;
}

impl<R: Rng + ?Sized> NoiseSource for R {
    fn uniform(&mut self, shape: &[usize]) -> Tensor {
        ArrayD::random_using(IxDyn(shape), StandardUniform, self)
    }

    fn normal(&mut self, shape: &[usize]) -> Tensor {
        ArrayD::random_using(IxDyn(shape), StandardNormal, self)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn seeded_sources_repeat() {
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);

        assert_eq!(a.uniform(&[3, 2]), b.uniform(&[3, 2]));
        assert_eq!(a.normal(&[4]), b.normal(&[4]));
    }

    #[test]
    fn uniform_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let u = rng.uniform(&[1000]);

        assert!(u.iter().all(|&v| (0. ..1.).contains(&v)));
    }
}
