use ndarray::{Array1, Array2, Axis};

use super::Tensor;
use crate::{RbmErr, Result};

/// The logistic function applied elementwise.
pub fn sigmoid(x: &Tensor) -> Tensor {
    x.mapv(|v| 1. / (1. + (-v).exp()))
}

/// `ln(1 + e^x)` without overflowing for large `x`.
pub fn softplus(x: f32) -> f32 {
    x.max(0.) + (-x.abs()).exp().ln_1p()
}

/// Views a batched tensor as a `[batch, rest]` matrix, copying only if the layout requires it.
pub fn flatten_batch(x: &Tensor) -> Result<Array2<f32>> {
    let Some((&batch, rest)) = x.shape().split_first() else {
        return Err(RbmErr::shape("batched tensor", x.shape(), &[0]));
    };

    let rest = rest.iter().product::<usize>();
    Ok(x.to_shape((batch, rest))?.into_owned())
}

/// Sums every axis but the batch one, giving one value per example.
pub fn sum_except_batch(x: &Tensor) -> Result<Array1<f32>> {
    Ok(flatten_batch(x)?.sum_axis(Axis(1)))
}

/// Averages the last `n` axes away.
pub fn mean_trailing(x: &Tensor, n: usize) -> Result<Tensor> {
    let mut out = x.clone();

    for _ in 0..n {
        let Some(last) = out.ndim().checked_sub(1) else {
            return Err(RbmErr::shape("trailing mean", x.shape(), &[]));
        };

        out = out
            .mean_axis(Axis(last))
            .ok_or_else(|| RbmErr::shape("trailing mean", x.shape(), &[]))?;
    }

    Ok(out)
}

/// Normalises the last axis into a probability vector.
///
/// With `implicit_zero` an extra zero-energy state takes part in the normalisation without being
/// part of the output, so the returned probabilities sum to less than one.
pub fn softmax_last(a: &Tensor, implicit_zero: bool) -> Tensor {
    let axis = Axis(a.ndim() - 1);
    let mut out = a.clone();

    for mut lane in out.lanes_mut(axis) {
        let mut max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if implicit_zero {
            max = max.max(0.);
        }

        lane.mapv_inplace(|v| (v - max).exp());
        let mut total = lane.sum();
        if implicit_zero {
            total += (-max).exp();
        }

        lane /= total;
    }

    out
}

/// `ln Σ e^a` over the last axis, which is removed from the result.
pub fn log_sum_exp_last(a: &Tensor, implicit_zero: bool) -> Tensor {
    let axis = Axis(a.ndim() - 1);

    a.map_axis(axis, |lane| {
        let mut max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if implicit_zero {
            max = max.max(0.);
        }

        let mut total = lane.fold(0., |acc, &v| acc + (v - max).exp());
        if implicit_zero {
            total += (-max).exp();
        }

        max + total.ln()
    })
}
