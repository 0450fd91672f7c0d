use log::debug;
use rand::{SeedableRng, rngs::StdRng};

use super::{BoundSpec, SparsitySpec, Trainer, TrainingConfig};
use crate::{
    RbmErr, Result,
    model::Model,
    stats::{ContrastiveDivergence, PersistentChain},
    tensor::TensorId,
    units::UnitId,
    updaters::{Updater, UpdaterState},
};

/// Builds `Trainer`s given a specification.
///
/// Each trained tensor `w` gets the updater
///
/// ```text
/// Bound(Sum(Variable(w), Scale(lr, Momentum(BatchMean(Cd(w)))), Scale(-lr * decay, Variable(w)),
///           Scale(lr * cost, BatchMean(Sparsity(w, unit, target)))))
/// ```
///
/// where the momentum, weight decay, sparsity and bound nodes only appear when configured and
/// relevant to `w`. Batch means divide by the size of the minibatch actually trained on, so a
/// short final minibatch takes a step of the same scale as the others.
#[derive(Default)]
pub struct TrainerBuilder;

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Trainer` for `model` following a spec.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `config` - The specification for the trainer.
    pub fn build(&self, model: &Model, config: &TrainingConfig) -> Result<Trainer<StdRng>> {
        self.validate(config)?;

        let cd = ContrastiveDivergence::new(model, &config.cd)?;
        let mut state = UpdaterState::new();
        let updaters = self.resolve_updaters(model, config, &mut state)?;
        let chain = self.resolve_chain(model, config, &cd)?;
        let monitored = self.resolve_monitored(model, &cd)?;

        debug!(
            updaters = updaters.len(),
            persistent = chain.is_some(),
            k = cd.k();
            "built trainer"
        );

        Ok(Trainer::new(
            cd,
            updaters,
            state,
            chain,
            config.monitors.clone(),
            monitored,
            config.batch_size,
            config.epochs,
            config.shuffle,
            self.generate_rng(config.seed),
        ))
    }

    fn validate(&self, config: &TrainingConfig) -> Result<()> {
        let checks = [
            ("learning rate", config.learning_rate, config.learning_rate > 0.),
            ("momentum", config.momentum, (0. ..1.).contains(&config.momentum)),
            ("weight decay", config.weight_decay, config.weight_decay >= 0.),
        ];

        for (what, value, ok) in checks {
            if !ok || !value.is_finite() {
                return Err(RbmErr::InvalidConfig(format!("invalid {what}: {value}")));
            }
        }

        Ok(())
    }

    fn resolve_updaters(
        &self,
        model: &Model,
        config: &TrainingConfig,
        state: &mut UpdaterState,
    ) -> Result<Vec<Updater>> {
        let sparsity = config
            .sparsity
            .iter()
            .map(|s| model.unit_id(&s.unit).map(|unit| (unit, s)))
            .collect::<Result<Vec<_>>>()?;

        for bound in &config.bounds {
            model.tensor_id(&bound.tensor)?;
        }

        model
            .variables()
            .into_iter()
            .map(|var| self.resolve_updater(model, config, &sparsity, var, state))
            .collect()
    }

    fn resolve_updater(
        &self,
        model: &Model,
        config: &TrainingConfig,
        sparsity: &[(UnitId, &SparsitySpec)],
        var: TensorId,
        state: &mut UpdaterState,
    ) -> Result<Updater> {
        let lr = config.learning_rate;

        let mut delta = Updater::batch_mean(Updater::Cd(var));
        if config.momentum > 0. {
            delta = Updater::momentum(delta, config.momentum, model, state)?;
        }

        let mut parts = vec![Updater::Variable(var), Updater::scale(lr, delta)];

        if config.weight_decay > 0. && model.tensor(var)?.ndim() >= 2 {
            parts.push(Updater::scale(
                -lr * config.weight_decay,
                Updater::Variable(var),
            ));
        }

        for &(unit, spec) in sparsity {
            let touches = model
                .params()
                .iter()
                .any(|set| set.owns(var) && set.affects(unit));

            if touches {
                parts.push(Updater::scale(
                    lr * spec.cost,
                    Updater::batch_mean(Updater::Sparsity {
                        var,
                        unit,
                        target: spec.target,
                    }),
                ));
            }
        }

        let mut updater = Updater::sum(parts)?;

        let name = model.weights().name(var)?;
        for &BoundSpec { bound, kind, .. } in config.bounds.iter().filter(|b| b.tensor == name) {
            updater = Updater::bound(updater, bound, kind);
        }

        Ok(updater)
    }

    fn resolve_chain(
        &self,
        model: &Model,
        config: &TrainingConfig,
        cd: &ContrastiveDivergence,
    ) -> Result<Option<PersistentChain>> {
        if !cd.is_persistent() {
            return Ok(None);
        }

        PersistentChain::zeros(model, cd.hidden(), config.batch_size.get()).map(Some)
    }

    /// The primary visible groups, the ones the monitors compare against their reconstruction.
    fn resolve_monitored(&self, model: &Model, cd: &ContrastiveDivergence) -> Result<Vec<UnitId>> {
        let mut monitored = Vec::new();
        for &id in cd.visible() {
            if model.unit(id)?.primary().is_none() {
                monitored.push(id);
            }
        }
        Ok(monitored)
    }

    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
