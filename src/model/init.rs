use ndarray::IxDyn;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Normal, Uniform};

use super::InitSpec;
use crate::{RbmErr, Result, tensor::Tensor};

/// `(fan_in, fan_out)` of a weight tensor: its first axis against the product of the rest.
///
/// Vectors count as their own fan out.
fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [first, rest @ ..] => (*first, rest.iter().product()),
    }
}

/// Builds a tensor of the given shape following `spec`, drawing from `rng` when needed.
///
/// # Errors
/// `ShapeMismatch` if explicit values don't fill the shape, `InvalidConfig` for invalid
/// distribution parameters.
pub fn initialize<R>(spec: &InitSpec, shape: &[usize], rng: &mut R) -> Result<Tensor>
where
    R: Rng + ?Sized,
{
    let dim = IxDyn(shape);

    let tensor = match spec {
        InitSpec::Const { value } => Tensor::from_elem(dim, *value),
        InitSpec::Values { values } => {
            let size: usize = shape.iter().product();
            if values.len() != size {
                return Err(RbmErr::shape("initial values", &[values.len()], &[size]));
            }

            Tensor::from_shape_vec(dim, values.clone())?
        }
        InitSpec::Uniform { low, high } => {
            Tensor::random_using(dim, Uniform::new(*low, *high)?, rng)
        }
        InitSpec::Normal { mean, std_dev } => {
            Tensor::random_using(dim, Normal::new(*mean, *std_dev)?, rng)
        }
        InitSpec::XavierUniform => {
            let (fan_in, fan_out) = fans(shape);
            let limit = (6. / (fan_in + fan_out).max(1) as f32).sqrt();
            Tensor::random_using(dim, Uniform::new_inclusive(-limit, limit)?, rng)
        }
        InitSpec::Kaiming => {
            let (fan_in, _) = fans(shape);
            let std_dev = (2. / fan_in.max(1) as f32).sqrt();
            Tensor::random_using(dim, Normal::new(0., std_dev)?, rng)
        }
    };

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn explicit_values_fill_the_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let spec = InitSpec::Values {
            values: vec![1., 2., 3., 4., 5., 6.],
        };

        let t = initialize(&spec, &[2, 3], &mut rng).unwrap();
        assert_eq!(t[[1, 0]], 4.);

        let err = initialize(&spec, &[4], &mut rng);
        assert!(matches!(err, Err(RbmErr::ShapeMismatch { .. })));
    }

    #[test]
    fn xavier_stays_within_its_limit() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = initialize(&InitSpec::XavierUniform, &[10, 20], &mut rng).unwrap();

        let limit = (6f32 / 30.).sqrt();
        assert!(t.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn invalid_distributions_are_config_errors() {
        let mut rng = StdRng::seed_from_u64(2);
        let spec = InitSpec::Normal {
            mean: 0.,
            std_dev: -1.,
        };
        assert!(matches!(
            initialize(&spec, &[3], &mut rng),
            Err(RbmErr::InvalidConfig(_))
        ));

        let spec = InitSpec::Uniform { low: 1., high: 0. };
        assert!(initialize(&spec, &[3], &mut rng).is_err());
    }

    #[test]
    fn kaiming_is_seeded() {
        let a = initialize(&InitSpec::Kaiming, &[4, 4], &mut StdRng::seed_from_u64(3)).unwrap();
        let b = initialize(&InitSpec::Kaiming, &[4, 4], &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }
}
