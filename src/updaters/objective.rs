use std::fmt;

use crate::{
    Result,
    model::Model,
    stats::{Phase, Stats},
    tensor::{Tensor, TensorId},
    units::{UnitId, VarMap},
};

/// A scalar training objective that can report its gradient with respect to a weight tensor.
///
/// Gradients are ascent directions: following them increases the objective.
pub trait Objective: fmt::Debug {
    fn gradient(&self, model: &Model, var: TensorId, stats: &Stats) -> Result<Tensor>;
}

/// The negative free energy of the data, with the hidden groups summed out, over the minibatch.
///
/// Its gradient is the energy gradient evaluated at the hidden groups' mean field given the
/// data, which holds for every parameter the energy is linear in.
#[derive(Debug, Clone)]
pub struct FreeEnergyObjective {
    hidden: Vec<UnitId>,
}

impl FreeEnergyObjective {
    pub fn new(hidden: Vec<UnitId>) -> Self {
        Self { hidden }
    }

    /// `-Σ F(v)` over the data phase.
    pub fn value(&self, model: &Model, stats: &Stats) -> Result<f32> {
        let clamped = self.clamped(model, stats)?;
        Ok(-model.free_energy(&self.hidden, &clamped)?.sum())
    }

    fn clamped(&self, model: &Model, stats: &Stats) -> Result<VarMap> {
        let hidden = model.complete_units(&self.hidden)?;
        let data = stats.values(Phase::Data);
        let kept = data
            .units()
            .into_iter()
            .filter(|u| !hidden.contains(u))
            .collect::<Vec<_>>();

        Ok(data.restricted(&kept))
    }
}

impl Objective for FreeEnergyObjective {
    fn gradient(&self, model: &Model, var: TensorId, stats: &Stats) -> Result<Tensor> {
        let clamped = self.clamped(model, stats)?;
        let means = model.mean_field(&self.hidden, &clamped)?;
        model.energy_gradient_sum(var, &clamped.merged(&means))
    }
}

/// Central finite differences of an arbitrary objective, one entry at a time.
///
/// Costs two objective evaluations per entry of the tensor, it is meant for small tensors and
/// for checking analytic gradients.
pub struct FiniteDifference<F> {
    objective: F,
    eps: f32,
}

impl<F> FiniteDifference<F>
where
    F: Fn(&Model, &Stats) -> Result<f32>,
{
    pub fn new(objective: F, eps: f32) -> Self {
        Self { objective, eps }
    }
}

impl<F> fmt::Debug for FiniteDifference<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiniteDifference")
            .field("eps", &self.eps)
            .finish_non_exhaustive()
    }
}

impl<F> Objective for FiniteDifference<F>
where
    F: Fn(&Model, &Stats) -> Result<f32>,
{
    fn gradient(&self, model: &Model, var: TensorId, stats: &Stats) -> Result<Tensor> {
        let base = model.tensor(var)?.clone();
        let mut grad = Tensor::zeros(base.raw_dim());
        let mut perturbed = model.clone();

        for (i, g) in grad.iter_mut().enumerate() {
            let mut evaluate = |delta: f32| {
                let mut shifted = base.clone();
                if let Some(x) = shifted.iter_mut().nth(i) {
                    *x += delta;
                }
                perturbed.set_tensor(var, shifted)?;
                (self.objective)(&perturbed, stats)
            };

            let up = evaluate(self.eps)?;
            let down = evaluate(-self.eps)?;
            *g = (up - down) / (2. * self.eps);
        }

        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        model::{InitSpec, ModelBuilder, presets},
        stats::ContrastiveDivergence,
        training::CdConfig,
    };

    #[test]
    fn free_energy_gradient_matches_finite_differences() {
        let mut spec = presets::binary_binary(3, 2);
        spec.tensors[0].init = InitSpec::Normal {
            mean: 0.,
            std_dev: 0.5,
        };

        let mut rng = StdRng::seed_from_u64(9);
        let model = ModelBuilder::new().build(&spec, &mut rng).unwrap();
        let v = model.unit_id("v").unwrap();
        let h = model.unit_id("h").unwrap();

        let data = VarMap::new().with(v, array![[1., 0., 1.], [0., 1., 1.]].into_dyn());
        let config = CdConfig::new("v", "h", NonZeroUsize::MIN);
        let cd = ContrastiveDivergence::new(&model, &config).unwrap();
        let stats = cd.run(&model, &data, None, &mut rng).unwrap();

        let analytic = FreeEnergyObjective::new(vec![h]);
        let reference = FreeEnergyObjective::new(vec![h]);
        let numeric = FiniteDifference::new(move |m: &Model, s: &Stats| reference.value(m, s), 1e-2);

        for var in model.variables() {
            let a = analytic.gradient(&model, var, &stats).unwrap();
            let n = numeric.gradient(&model, var, &stats).unwrap();
            for (x, y) in a.iter().zip(&n) {
                assert!((x - y).abs() < 1e-2, "{}: {x} vs {y}", model.weights().name(var).unwrap());
            }
        }
    }
}
