use ndarray::{Array4, ArrayView4, Ix4, s};

use super::Tensor;
use crate::{RbmErr, Result};

/// "Valid" 2-D convolution of a batch of multi-channel images.
///
/// # Arguments
/// * `x` - Input of shape `[batch, in_maps, height, width]`.
/// * `k` - Kernel of shape `[out_maps, in_maps, kh, kw]`, flipped spatially as in a true
///   convolution.
///
/// # Returns
/// A tensor of shape `[batch, out_maps, height - kh + 1, width - kw + 1]`.
pub fn conv2d_valid(x: &Tensor, k: &Tensor) -> Result<Tensor> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let k = k.view().into_dimensionality::<Ix4>()?;

    let flipped = k.slice(s![.., .., ..;-1, ..;-1]);
    Ok(correlate_valid(x, flipped)?.into_dyn())
}

/// "Full" 2-D convolution, the output grows by `kernel - 1` on each spatial axis.
///
/// # Arguments
/// * `x` - Input of shape `[batch, in_maps, height, width]`.
/// * `k` - Kernel of shape `[out_maps, in_maps, kh, kw]`.
///
/// # Returns
/// A tensor of shape `[batch, out_maps, height + kh - 1, width + kw - 1]`.
pub fn conv2d_full(x: &Tensor, k: &Tensor) -> Result<Tensor> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let k = k.view().into_dimensionality::<Ix4>()?;

    let (b, c, h, w) = x.dim();
    let (_, _, kh, kw) = k.dim();
    let (ph, pw) = (kh.saturating_sub(1), kw.saturating_sub(1));

    let mut padded = Array4::zeros((b, c, h + 2 * ph, w + 2 * pw));
    padded
        .slice_mut(s![.., .., ph..ph + h, pw..pw + w])
        .assign(&x);

    let flipped = k.slice(s![.., .., ..;-1, ..;-1]);
    Ok(correlate_valid(padded.view(), flipped)?.into_dyn())
}

/// Gradient of `Σ y ⊙ conv2d_valid(x, k)` with respect to `k`.
///
/// # Arguments
/// * `x` - The convolution's input, `[batch, in_maps, height, width]`.
/// * `y` - The tensor paired with the convolution's output, `[batch, out_maps, oh, ow]`.
///
/// # Returns
/// A tensor of shape `[out_maps, in_maps, height - oh + 1, width - ow + 1]`, summed over the
/// batch.
pub fn conv2d_weight_gradient(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let y = y.view().into_dimensionality::<Ix4>()?;

    let (b, cin, h, w) = x.dim();
    let (yb, cout, oh, ow) = y.dim();
    if yb != b || oh > h || ow > w {
        return Err(RbmErr::shape("convolution output", y.shape(), &[b, cout, oh, ow]));
    }

    let (kh, kw) = (h - oh + 1, w - ow + 1);
    let n = b * oh * ow;
    let y_flat = y.permuted_axes([1, 0, 2, 3]);
    let y_flat = y_flat.to_shape((cout, n))?;

    let mut grad = Array4::zeros((cout, cin, kh, kw));
    for p in 0..kh {
        for q in 0..kw {
            let patch = x
                .slice(s![.., .., p..p + oh, q..q + ow])
                .permuted_axes([1, 0, 2, 3]);
            let patch = patch.to_shape((cin, n))?;

            grad.slice_mut(s![.., .., p, q])
                .assign(&y_flat.dot(&patch.t()));
        }
    }

    Ok(grad.slice(s![.., .., ..;-1, ..;-1]).to_owned().into_dyn())
}

/// Cross-correlation without padding, contracting the channel axis.
fn correlate_valid(x: ArrayView4<f32>, k: ArrayView4<f32>) -> Result<Array4<f32>> {
    let (b, cin, h, w) = x.dim();
    let (cout, kcin, kh, kw) = k.dim();

    if kcin != cin || kh > h || kw > w {
        return Err(RbmErr::shape("convolution kernel", k.shape(), &[cout, cin, h, w]));
    }

    let (oh, ow) = (h - kh + 1, w - kw + 1);
    let mut out = ndarray::Array2::zeros((b * oh * ow, cout));

    for p in 0..kh {
        for q in 0..kw {
            let patch = x
                .slice(s![.., .., p..p + oh, q..q + ow])
                .permuted_axes([0, 2, 3, 1]);
            let patch = patch.to_shape((b * oh * ow, cin))?;
            let kpq = k.slice(s![.., .., p, q]);

            out += &patch.dot(&kpq.t());
        }
    }

    let out = out
        .into_shape_with_order((b, oh, ow, cout))?
        .permuted_axes([0, 3, 1, 2]);

    Ok(out.as_standard_layout().into_owned())
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use ndarray_rand::RandomExt;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::StandardNormal;

    use super::*;

    fn random(shape: &[usize], rng: &mut StdRng) -> Tensor {
        ArrayD::random_using(IxDyn(shape), StandardNormal, rng)
    }

    #[test]
    fn valid_convolution_flips_the_kernel() {
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 3]), vec![1., 2., 3.]).unwrap();
        let k = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 2]), vec![1., 10.]).unwrap();

        let y = conv2d_valid(&x, &k).unwrap();
        assert_eq!(y.shape(), &[1, 1, 1, 2]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![12., 23.]);
    }

    #[test]
    fn full_convolution_grows_the_output() {
        let x = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 2]), vec![1., 2.]).unwrap();
        let k = ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, 2]), vec![1., 10.]).unwrap();

        let y = conv2d_full(&x, &k).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![1., 12., 20.]);
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = random(&[2, 2, 4, 5], &mut rng);
        let k = random(&[3, 2, 2, 3], &mut rng);
        let y = random(&[2, 3, 3, 3], &mut rng);

        let objective = |k: &Tensor| (&conv2d_valid(&x, k).unwrap() * &y).sum();
        let grad = conv2d_weight_gradient(&x, &y).unwrap();

        let eps = 1e-2;
        for idx in [[0, 0, 0, 0], [1, 1, 1, 2], [2, 0, 1, 1]] {
            let mut plus = k.clone();
            plus[idx.as_slice()] += eps;
            let mut minus = k.clone();
            minus[idx.as_slice()] -= eps;

            let numeric = (objective(&plus) - objective(&minus)) / (2. * eps);
            let analytic = grad[idx.as_slice()];
            assert!((numeric - analytic).abs() < 1e-2, "{numeric} vs {analytic}");
        }
    }
}
