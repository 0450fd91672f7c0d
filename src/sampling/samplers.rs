//! Sampling primitives. Every function is pure given its parameters and the injected noise
//! source, and draws exactly one noise array per call (`categorical` draws one value per lane).

use ndarray::{Axis, Zip};

use super::NoiseSource;
use crate::tensor::{Tensor, softmax_last};

/// Below this magnitude the exponential formulas on `[0, 1]` lose all precision.
const RATE_EPS: f32 = 1e-6;

/// Samples `1` with probability `p`, `0` otherwise.
pub fn bernoulli(p: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let mut u = noise.uniform(p.shape());
    Zip::from(&mut u).and(p).for_each(|u, &p| *u = (*u < p) as u8 as f32);
    u
}

/// Samples a normal variable with the given mean and variance.
pub fn gaussian(mean: &Tensor, var: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let z = noise.normal(mean.shape());
    mean + &(var.mapv(f32::sqrt) * z)
}

/// Samples one-hot vectors along the last axis from the given probabilities.
///
/// If the probabilities of a lane sum to less than one (see `softmax` with an implicit zero
/// state) the remaining mass selects no category and the lane stays all zeros.
pub fn categorical(p: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let last = Axis(p.ndim() - 1);
    let lanes_shape = &p.shape()[..p.ndim() - 1];
    let u = noise.uniform(lanes_shape);

    let mut out = Tensor::zeros(p.raw_dim());
    Zip::from(out.lanes_mut(last))
        .and(p.lanes(last))
        .and(&u)
        .for_each(|mut out, p, &u| {
            let mut acc = 0.;
            for (o, &p) in out.iter_mut().zip(p) {
                acc += p;
                if u < acc {
                    *o = 1.;
                    break;
                }
            }
        });

    out
}

/// Categorical sample from activations, optionally with an extra zero-energy state.
pub fn softmax(a: &Tensor, implicit_zero: bool, noise: &mut dyn NoiseSource) -> Tensor {
    categorical(&softmax_last(a, implicit_zero), noise)
}

/// Samples `x ≥ 0` with density proportional to `e^{-rate·x}`, by inverting the CDF.
pub fn exponential(rate: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let mut u = noise.uniform(rate.shape());
    Zip::from(&mut u)
        .and(rate)
        .for_each(|u, &l| *u = -(-*u).ln_1p() / l);
    u
}

/// Samples `x ∈ [0, 1]` with density proportional to `e^{-rate·x}`, by inverting the CDF.
///
/// The rate may be negative, the distribution then leans toward 1.
pub fn truncated_exponential(rate: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let mut u = noise.uniform(rate.shape());
    Zip::from(&mut u).and(rate).for_each(|u, &l| {
        if l.abs() < RATE_EPS {
            return;
        }

        let mass = -(-l).exp_m1();
        *u = (-(-*u * mass).ln_1p() / l).clamp(0., 1.);
    });
    u
}

/// Mean of the truncated exponential distribution on `[0, 1]`.
pub fn truncated_exponential_mean(rate: &Tensor) -> Tensor {
    rate.mapv(truncated_exponential_mean_scalar)
}

/// `1/λ - 1/(e^λ - 1)`, switching to its Taylor series for `|λ| ≤ 0.5` where the closed form
/// cancels catastrophically.
pub fn truncated_exponential_mean_scalar(l: f32) -> f32 {
    if l.abs() > 0.5 {
        return 1. / l - 1. / l.exp_m1();
    }

    let l2 = l * l;
    0.5 - l / 12. + l * l2 / 720. - l * l2 * l2 / 30240.
}

/// Samples a Laplace variable: `loc - scale · sgn(u) · ln(1 - 2|u|)` with `u ∈ [-½, ½)`.
pub fn laplacian(loc: &Tensor, scale: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let mut u = noise.uniform(loc.shape());
    Zip::from(&mut u)
        .and(loc)
        .and(scale)
        .for_each(|u, &loc, &scale| {
            let c = *u - 0.5;
            *u = loc - scale * c.signum() * (-2. * c.abs()).ln_1p();
        });
    u
}
