use std::num::NonZeroUsize;

use log::{debug, info, warn};
use rand::Rng;

use super::{Dataset, MonitorSpec};
use crate::{
    Result,
    model::Model,
    monitors,
    sampling::NoiseSource,
    stats::{ContrastiveDivergence, PersistentChain, Stats},
    units::{UnitId, VarMap},
    updaters::{UpdateContext, Updater, UpdaterState},
};

/// The monitor values of a single minibatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub monitors: Vec<(MonitorSpec, f32)>,
}

/// The monitor values of an epoch, averaged over its minibatches.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub batches: usize,
    /// Ragged minibatches left out because a persistent chain can't take them.
    pub skipped: usize,
    pub monitors: Vec<(MonitorSpec, f32)>,
}

/// Everything one training step touches but the noise source.
#[derive(Debug)]
struct UpdateStep {
    cd: ContrastiveDivergence,
    updaters: Vec<Updater>,
    state: UpdaterState,
    chain: Option<PersistentChain>,
    monitors: Vec<MonitorSpec>,
    monitored: Vec<UnitId>,
}

impl UpdateStep {
    fn monitor(&self, stats: &Stats) -> Result<Vec<(MonitorSpec, f32)>> {
        self.monitors
            .iter()
            .map(|&spec| {
                let value = match spec {
                    MonitorSpec::ReconstructionMse => {
                        monitors::reconstruction_mse(stats, &self.monitored)?
                    }
                    MonitorSpec::ReconstructionCrossEntropy => {
                        monitors::reconstruction_cross_entropy(stats, &self.monitored)?
                    }
                };
                Ok((spec, value))
            })
            .collect()
    }

    fn run(
        &mut self,
        model: &mut Model,
        batch: &VarMap,
        noise: &mut dyn NoiseSource,
    ) -> Result<StepReport> {
        let stats = self.cd.run(model, batch, self.chain.as_ref(), noise)?;

        let mut writes = Vec::new();
        let mut values = Vec::with_capacity(self.updaters.len());
        {
            let ctx = UpdateContext {
                model,
                stats: &stats,
                state: &self.state,
            };
            for updater in &self.updaters {
                values.push((updater.target()?, updater.evaluate(&ctx, &mut writes)?));
            }
        }

        let monitors = self.monitor(&stats)?;

        for (var, value) in values {
            model.set_tensor(var, value)?;
        }
        let state_writes = writes.len();
        for write in writes {
            self.state.apply(write)?;
        }
        if let (Some(chain), Some(write)) = (self.chain.as_mut(), stats.into_persistent_write()) {
            chain.apply(write);
        }

        debug!(
            tensors = self.updaters.len(),
            state_writes = state_writes;
            "applied updates"
        );

        Ok(StepReport { monitors })
    }
}

/// Trains a model by contrastive divergence over minibatches of a dataset.
///
/// Every step reads the model, the updater state and the persistent chain first, and only then
/// writes the new tensors, accumulators and chain state, so no read of a step sees a write of
/// the same step.
#[derive(Debug)]
pub struct Trainer<R: Rng> {
    update: UpdateStep,
    batch_size: NonZeroUsize,
    epochs: NonZeroUsize,
    shuffle: bool,
    epoch: usize,
    rng: R,
}

impl<R: Rng> Trainer<R> {
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `cd` - The statistics engine.
    /// * `updaters` - One updater per trained tensor.
    /// * `state` - The accumulators the updaters were built against.
    /// * `chain` - The persistent chain, for a persistent engine.
    /// * `rng` - The noise source for sampling and shuffling.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cd: ContrastiveDivergence,
        updaters: Vec<Updater>,
        state: UpdaterState,
        chain: Option<PersistentChain>,
        monitors: Vec<MonitorSpec>,
        monitored: Vec<UnitId>,
        batch_size: NonZeroUsize,
        epochs: NonZeroUsize,
        shuffle: bool,
        rng: R,
    ) -> Self {
        Self {
            update: UpdateStep {
                cd,
                updaters,
                state,
                chain,
                monitors,
                monitored,
            },
            batch_size,
            epochs,
            shuffle,
            epoch: 0,
            rng,
        }
    }

    pub fn cd(&self) -> &ContrastiveDivergence {
        &self.update.cd
    }

    pub fn updaters(&self) -> &[Updater] {
        &self.update.updaters
    }

    pub fn chain(&self) -> Option<&PersistentChain> {
        self.update.chain.as_ref()
    }

    pub fn state(&self) -> &UpdaterState {
        &self.update.state
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// Trains on a single minibatch with an external noise source.
    pub fn step(
        &mut self,
        model: &mut Model,
        batch: &VarMap,
        noise: &mut dyn NoiseSource,
    ) -> Result<StepReport> {
        self.update.run(model, batch, noise)
    }

    /// Goes once over `dataset`, shuffling it first if configured to.
    pub fn train_epoch(&mut self, model: &mut Model, dataset: &mut Dataset) -> Result<EpochReport> {
        if self.shuffle {
            dataset.shuffle(&mut self.rng);
        }

        let size = self.batch_size.get();
        let persistent = self.update.cd.is_persistent();
        let mut sums = vec![0.; self.update.monitors.len()];
        let mut batches = 0;
        let mut skipped = 0;

        for batch in dataset.batches(size) {
            if persistent && batch.batch_size() != Some(size) {
                warn!(
                    batch = batch.batch_size().unwrap_or(0),
                    expected = size;
                    "skipping a ragged minibatch, the persistent chain has a fixed size"
                );
                skipped += 1;
                continue;
            }

            let report = self.update.run(model, &batch, &mut self.rng)?;
            for (sum, (_, value)) in sums.iter_mut().zip(&report.monitors) {
                *sum += value;
            }
            batches += 1;
        }

        self.epoch += 1;
        let monitors = self
            .update
            .monitors
            .iter()
            .zip(sums)
            .map(|(&spec, sum)| (spec, if batches == 0 { 0. } else { sum / batches as f32 }))
            .collect::<Vec<_>>();

        info!(
            epoch = self.epoch,
            batches = batches;
            "finished epoch: {monitors:?}"
        );

        Ok(EpochReport {
            epoch: self.epoch,
            batches,
            skipped,
            monitors,
        })
    }

    /// Runs the configured amount of epochs.
    pub fn train(&mut self, model: &mut Model, dataset: &mut Dataset) -> Result<Vec<EpochReport>> {
        (0..self.epochs.get())
            .map(|_| self.train_epoch(model, dataset))
            .collect()
    }
}
