//! Reductions over a minibatch's statistics, reported while training.

use crate::{
    Result,
    stats::{Phase, Stats},
    tensor::Tensor,
    units::UnitId,
};

fn per_example_mean<F>(stats: &Stats, units: &[UnitId], f: F) -> Result<f32>
where
    F: Fn(&Tensor, &Tensor) -> Tensor,
{
    let mut total = 0.;
    let mut batch = 0;
    for &unit in units {
        let data = stats.values(Phase::Data).require(unit)?;
        let model = stats.values(Phase::Model).require(unit)?;
        total += f(data, model).sum();
        batch = data.shape().first().copied().unwrap_or(0);
    }

    Ok(if batch == 0 { 0. } else { total / batch as f32 })
}

/// Squared distance between the data and its reconstruction at the end of the chain, summed
/// over the units and averaged over the examples.
pub fn reconstruction_mse(stats: &Stats, units: &[UnitId]) -> Result<f32> {
    per_example_mean(stats, units, |data, model| {
        let diff = data - model;
        &diff * &diff
    })
}

/// Cross entropy of the data under its reconstruction, read as Bernoulli means, summed over the
/// units and averaged over the examples.
pub fn reconstruction_cross_entropy(stats: &Stats, units: &[UnitId]) -> Result<f32> {
    const EPS: f32 = 1e-7;

    per_example_mean(stats, units, |data, model| {
        let p = model.mapv(|p| p.clamp(EPS, 1. - EPS));
        -(data * &p.mapv(f32::ln) + (1. - data) * &p.mapv(|p| (1. - p).ln()))
    })
}
