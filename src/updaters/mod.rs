//! Updater expression trees.
//!
//! An updater evaluates to the *new* value of a single weight tensor out of the current model
//! and a minibatch's statistics. The usual tree adds a scaled, smoothed contrastive divergence
//! gradient to the tensor's current value:
//!
//! ```text
//! Sum(Variable(w), Scale(lr, Momentum(BatchMean(Cd(w)))))
//! ```
//!
//! Evaluation never mutates anything: stateful nodes push `StateWrite`s which the caller applies
//! once every updater of the step has been evaluated.

mod objective;
mod state;

pub use objective::{FiniteDifference, FreeEnergyObjective, Objective};
pub use state::{StateWrite, UpdaterState};

use ndarray::Zip;

use crate::{
    RbmErr, Result,
    model::Model,
    stats::{Phase, Stats},
    tensor::{Tensor, TensorId},
    training::BoundKind,
    units::UnitId,
};

/// What an updater reads while being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    pub model: &'a Model,
    pub stats: &'a Stats,
    pub state: &'a UpdaterState,
}

#[derive(Debug)]
pub enum Updater {
    /// The tensor's current value.
    Variable(TensorId),
    /// Data phase minus model phase gradient sums of the negative energy.
    Cd(TensorId),
    /// The gradient of an arbitrary objective.
    Gradient {
        var: TensorId,
        objective: Box<dyn Objective>,
    },
    /// Pulls the data phase activity of `unit` towards `target`: the negated energy gradient
    /// with `target` subtracted from the unit's value.
    Sparsity {
        var: TensorId,
        unit: UnitId,
        target: f32,
    },
    Sum(Vec<Updater>),
    Scale(f32, Box<Updater>),
    /// Its inner updater divided by the size of the minibatch the statistics come from.
    BatchMean(Box<Updater>),
    /// Exponentially decayed accumulator of its inner updater, kept in a state slot.
    Momentum {
        slot: usize,
        decay: f32,
        inner: Box<Updater>,
    },
    /// Keeps the previous value of every entry whose proposed value crosses `bound`.
    Bound {
        bound: f32,
        kind: BoundKind,
        inner: Box<Updater>,
    },
}

use Updater::*;

impl Updater {
    /// Adds up updaters of a single tensor.
    ///
    /// # Errors
    /// `StructuralMismatch` if `parts` is empty or its updaters target different tensors.
    pub fn sum(parts: Vec<Updater>) -> Result<Self> {
        let sum = Sum(parts);
        sum.target()?;
        Ok(sum)
    }

    pub fn scale(factor: f32, inner: Updater) -> Self {
        Scale(factor, Box::new(inner))
    }

    pub fn neg(inner: Updater) -> Self {
        Self::scale(-1., inner)
    }

    pub fn batch_mean(inner: Updater) -> Self {
        BatchMean(Box::new(inner))
    }

    /// Wraps `inner` in a momentum node, allocating its accumulator in `state`.
    pub fn momentum(
        inner: Updater,
        decay: f32,
        model: &Model,
        state: &mut UpdaterState,
    ) -> Result<Self> {
        let shape = model.tensor(inner.target()?)?.shape().to_vec();
        Ok(Momentum {
            slot: state.allocate(&shape),
            decay,
            inner: Box::new(inner),
        })
    }

    pub fn bound(inner: Updater, bound: f32, kind: BoundKind) -> Self {
        Bound {
            bound,
            kind,
            inner: Box::new(inner),
        }
    }

    /// The tensor this updater computes a value for.
    pub fn target(&self) -> Result<TensorId> {
        match self {
            Variable(var) | Cd(var) => Ok(*var),
            Gradient { var, .. } | Sparsity { var, .. } => Ok(*var),
            Sum(parts) => {
                let Some((first, rest)) = parts.split_first() else {
                    return Err(RbmErr::StructuralMismatch(
                        "an updater sum needs at least one term".to_string(),
                    ));
                };

                let target = first.target()?;
                for part in rest {
                    let other = part.target()?;
                    if other != target {
                        return Err(RbmErr::StructuralMismatch(format!(
                            "an updater sum mixes tensors #{} and #{}",
                            target.index(),
                            other.index()
                        )));
                    }
                }

                Ok(target)
            }
            Scale(_, inner) | BatchMean(inner) => inner.target(),
            Momentum { inner, .. } | Bound { inner, .. } => inner.target(),
        }
    }

    /// Computes the updater's value, pushing the state writes it schedules into `writes`.
    pub fn evaluate(&self, ctx: &UpdateContext, writes: &mut Vec<StateWrite>) -> Result<Tensor> {
        let UpdateContext {
            model,
            stats,
            state,
        } = *ctx;

        match self {
            Variable(var) => Ok(model.tensor(*var)?.clone()),
            Cd(var) => {
                let positive = model.energy_gradient_sum(*var, stats.values(Phase::Data))?;
                let negative = model.energy_gradient_sum(*var, stats.values(Phase::Model))?;
                Ok(positive - negative)
            }
            Gradient { var, objective } => objective.gradient(model, *var, stats),
            Sparsity { var, unit, target } => {
                let data = stats.values(Phase::Data);
                let shifted = data.require(*unit)? - *target;
                let vmap = data.clone().with(*unit, shifted);
                Ok(-model.energy_gradient_sum(*var, &vmap)?)
            }
            Sum(parts) => {
                self.target()?;

                let mut total: Option<Tensor> = None;
                for part in parts {
                    let value = part.evaluate(ctx, writes)?;
                    total = Some(match total {
                        Some(total) => total + value,
                        None => value,
                    });
                }

                total.ok_or_else(|| {
                    RbmErr::StructuralMismatch("an updater sum needs at least one term".to_string())
                })
            }
            Scale(factor, inner) => Ok(inner.evaluate(ctx, writes)? * *factor),
            BatchMean(inner) => {
                let batch = stats.values(Phase::Data).uniform_batch_size()?.unwrap_or(1);
                Ok(inner.evaluate(ctx, writes)? / batch.max(1) as f32)
            }
            Momentum { slot, decay, inner } => {
                let delta = inner.evaluate(ctx, writes)?;
                let accumulated = state.slot(*slot)? * *decay + delta;
                writes.push(StateWrite {
                    slot: *slot,
                    value: accumulated.clone(),
                });
                Ok(accumulated)
            }
            Bound { bound, kind, inner } => {
                let mut proposal = inner.evaluate(ctx, writes)?;
                let previous = model.tensor(self.target()?)?;

                Zip::from(&mut proposal)
                    .and(previous)
                    .for_each(|new, &old| {
                        let crosses = match kind {
                            BoundKind::Upper => *new > *bound,
                            BoundKind::Lower => *new < *bound,
                        };
                        if crosses {
                            *new = old;
                        }
                    });

                Ok(proposal)
            }
        }
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
        units::VarMap,
    };

    fn setup() -> (Model, Stats) {
        let mut spec = presets::binary_binary(3, 2);
        spec.tensors[1].init = InitSpec::Values {
            values: vec![0.5, -0.5, 0.9],
        };

        let mut rng = StdRng::seed_from_u64(3);
        let model = ModelBuilder::new().build(&spec, &mut rng).unwrap();
        let v = model.unit_id("v").unwrap();
        let data = VarMap::new().with(v, array![[1., 0., 1.], [0., 1., 1.]].into_dyn());

        let cd = ContrastiveDivergence::new(&model, &CdConfig::new("v", "h", NonZeroUsize::MIN))
            .unwrap();
        let stats = cd.run(&model, &data, None, &mut rng).unwrap();
        (model, stats)
    }

    fn evaluate(updater: &Updater, model: &Model, stats: &Stats) -> (Tensor, Vec<StateWrite>) {
        let state = UpdaterState::new();
        let ctx = UpdateContext {
            model,
            stats,
            state: &state,
        };
        let mut writes = Vec::new();
        let value = updater.evaluate(&ctx, &mut writes).unwrap();
        (value, writes)
    }

    #[test]
    fn sums_must_target_a_single_tensor() {
        let (model, _) = setup();
        let w = model.tensor_id("w").unwrap();
        let bv = model.tensor_id("bv").unwrap();

        let err = Updater::sum(vec![Variable(w), Cd(bv)]);
        assert!(matches!(err, Err(RbmErr::StructuralMismatch(_))));
        assert!(Updater::sum(vec![]).is_err());
        assert_eq!(Updater::sum(vec![Variable(w), Cd(w)]).unwrap().target().unwrap(), w);
    }

    #[test]
    fn cd_is_the_difference_of_phases() {
        let (model, stats) = setup();
        let w = model.tensor_id("w").unwrap();

        let (value, writes) = evaluate(&Cd(w), &model, &stats);
        let expected = model.energy_gradient_sum(w, stats.values(Phase::Data)).unwrap()
            - model.energy_gradient_sum(w, stats.values(Phase::Model)).unwrap();
        assert_eq!(value, expected);
        assert!(writes.is_empty());
    }

    #[test]
    fn batch_means_divide_by_the_actual_minibatch() {
        let (model, stats) = setup();
        let w = model.tensor_id("w").unwrap();

        let (sum, _) = evaluate(&Cd(w), &model, &stats);
        let (mean, _) = evaluate(&Updater::batch_mean(Cd(w)), &model, &stats);
        assert_eq!(mean, sum / 2.);
        assert_eq!(Updater::batch_mean(Cd(w)).target().unwrap(), w);
    }

    #[test]
    fn bounds_reject_crossing_entries() {
        let (model, stats) = setup();
        let bv = model.tensor_id("bv").unwrap();

        let step = || Updater::sum(vec![Variable(bv), Updater::scale(1., Variable(bv))]).unwrap();

        let (upper, _) = evaluate(&Updater::bound(step(), 1., BoundKind::Upper), &model, &stats);
        assert_eq!(upper, array![1., -1., 0.9].into_dyn());

        let (lower, _) = evaluate(&Updater::bound(step(), -0.5, BoundKind::Lower), &model, &stats);
        assert_eq!(lower, array![1., -0.5, 1.8].into_dyn());
    }

    #[test]
    fn momentum_schedules_its_accumulator() {
        let (model, stats) = setup();
        let bv = model.tensor_id("bv").unwrap();

        let mut state = UpdaterState::new();
        let momentum = Updater::momentum(Variable(bv), 0.5, &model, &mut state).unwrap();
        state
            .apply(StateWrite {
                slot: 0,
                value: array![2., 2., 2.].into_dyn(),
            })
            .unwrap();

        let ctx = UpdateContext {
            model: &model,
            stats: &stats,
            state: &state,
        };
        let mut writes = Vec::new();
        let value = momentum.evaluate(&ctx, &mut writes).unwrap();

        let expected = array![1.5, 0.5, 1.9].into_dyn();
        assert!(value.iter().zip(&expected).all(|(a, b)| (a - b).abs() < 1e-6));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].value, value);
        assert_eq!(state.slot(0).unwrap(), &array![2., 2., 2.].into_dyn());
    }

    #[test]
    fn sparsity_pulls_towards_the_target() {
        let (model, stats) = setup();
        let bh = model.tensor_id("bh").unwrap();
        let h = model.unit_id("h").unwrap();

        let updater = Sparsity {
            var: bh,
            unit: h,
            target: 2.,
        };
        let (value, _) = evaluate(&updater, &model, &stats);

        // Binary activity never reaches 2, the bias is pushed up.
        assert!(value.iter().all(|&g| g > 0.));
    }

    #[test]
    fn gradients_delegate_to_the_objective() {
        let (model, stats) = setup();
        let w = model.tensor_id("w").unwrap();
        let h = model.unit_id("h").unwrap();

        let updater = Gradient {
            var: w,
            objective: Box::new(FreeEnergyObjective::new(vec![h])),
        };
        let (value, _) = evaluate(&updater, &model, &stats);
        let expected = FreeEnergyObjective::new(vec![h])
            .gradient(&model, w, &stats)
            .unwrap();
        assert_eq!(value, expected);
    }
}
