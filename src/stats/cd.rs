use std::num::NonZeroUsize;

use log::debug;

use super::{GibbsStep, gibbs_step};
use crate::{
    RbmErr, Result,
    model::Model,
    sampling::NoiseSource,
    tensor::Tensor,
    training::CdConfig,
    units::{Capability, UnitId, VarMap},
};

/// Which half of the contrastive divergence a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Visible groups clamped to the data.
    Data,
    /// End of the Gibbs chain.
    Model,
}

/// The values and activations of one phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseRecord {
    pub values: VarMap,
    pub activations: VarMap,
}

/// The hidden values to store back into a `PersistentChain` once a step is over.
#[derive(Debug, Clone)]
pub struct PersistentWrite {
    pub hidden: VarMap,
}

/// The statistics of one minibatch.
///
/// They are read only: the pending persistent write is applied by whoever owns the chain, after
/// every consumer is done with the bundle.
#[derive(Debug, Clone)]
pub struct Stats {
    data: PhaseRecord,
    model: PhaseRecord,
    write: Option<PersistentWrite>,
}

impl Stats {
    pub fn phase(&self, phase: Phase) -> &PhaseRecord {
        match phase {
            Phase::Data => &self.data,
            Phase::Model => &self.model,
        }
    }

    pub fn values(&self, phase: Phase) -> &VarMap {
        &self.phase(phase).values
    }

    pub fn activations(&self, phase: Phase) -> &VarMap {
        &self.phase(phase).activations
    }

    pub fn persistent_write(&self) -> Option<&PersistentWrite> {
        self.write.as_ref()
    }

    pub fn into_persistent_write(self) -> Option<PersistentWrite> {
        self.write
    }
}

/// The hidden state of a persistent chain, kept across minibatches.
#[derive(Debug, Clone)]
pub struct PersistentChain {
    hidden: VarMap,
}

impl PersistentChain {
    /// A chain of `batch` all-zero particles, with the proxies derived from the zeros.
    pub fn zeros(model: &Model, hidden: &[UnitId], batch: usize) -> Result<Self> {
        let mut primaries = VarMap::new();
        for id in model.complete_units(hidden)? {
            let group = model.unit(id)?;
            if group.primary().is_none() {
                let mut shape = vec![batch];
                shape.extend_from_slice(group.shape());
                primaries = primaries.with(id, Tensor::zeros(shape));
            }
        }

        Ok(Self {
            hidden: model.complete_vmap(&primaries)?,
        })
    }

    pub fn hidden(&self) -> &VarMap {
        &self.hidden
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.hidden.batch_size()
    }

    pub fn apply(&mut self, write: PersistentWrite) {
        self.hidden = write.hidden;
    }
}

/// The state carried from one chain iteration to the next: the gibbs values of the hidden
/// groups.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub hidden: VarMap,
}

/// What one chain iteration leaves for the statistics.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub values: VarMap,
    pub activations: VarMap,
}

/// CD-k statistics, optionally persistent.
#[derive(Debug, Clone)]
pub struct ContrastiveDivergence {
    visible: Vec<UnitId>,
    hidden: Vec<UnitId>,
    context: Vec<UnitId>,
    k: NonZeroUsize,
    persistent: bool,
    mean_field_for_stats: Vec<UnitId>,
    mean_field_for_gibbs: Vec<UnitId>,
}

fn resolve(model: &Model, names: &[String]) -> Result<Vec<UnitId>> {
    names.iter().map(|name| model.unit_id(name)).collect()
}

impl ContrastiveDivergence {
    /// Resolves `config` against `model`.
    ///
    /// # Errors
    /// `UnknownUnit` for names the model doesn't have, `StructuralMismatch` if no hidden group is
    /// left, `UnsupportedOperation` if a group can't be sampled or mean fielded as configured.
    pub fn new(model: &Model, config: &CdConfig) -> Result<Self> {
        let visible = model.complete_units(&resolve(model, &config.visible)?)?;
        let context = resolve(model, &config.context)?;

        let hidden = if config.hidden.is_empty() {
            let given = [visible.as_slice(), context.as_slice()].concat();
            model.dependent_units(&given)
        } else {
            resolve(model, &config.hidden)?
        };
        let hidden = model.complete_units(&hidden)?;

        if hidden.is_empty() {
            return Err(RbmErr::StructuralMismatch(
                "contrastive divergence needs at least one hidden group".to_string(),
            ));
        }

        let mean_field_for_stats = resolve(model, &config.mean_field_for_stats)?;
        let mean_field_for_gibbs = resolve(model, &config.mean_field_for_gibbs)?;

        let cd = Self {
            visible,
            hidden,
            context,
            k: config.k,
            persistent: config.persistent,
            mean_field_for_stats,
            mean_field_for_gibbs,
        };
        cd.check_capabilities(model)?;

        Ok(cd)
    }

    fn check_capabilities(&self, model: &Model) -> Result<()> {
        for &id in self.visible.iter().chain(&self.hidden) {
            let primary = model.unit(id)?.primary().unwrap_or(id);
            let stats_mf = self.mean_field_for_stats.contains(&primary);
            let gibbs_mf = self.mean_field_for_gibbs.contains(&primary);

            if !(stats_mf && gibbs_mf) {
                model.check_capability(&[primary], Capability::Sample)?;
            }
            if stats_mf || gibbs_mf {
                model.check_capability(&[primary], Capability::MeanField)?;
            }
        }

        Ok(())
    }

    pub fn visible(&self) -> &[UnitId] {
        &self.visible
    }

    pub fn hidden(&self) -> &[UnitId] {
        &self.hidden
    }

    pub fn context(&self) -> &[UnitId] {
        &self.context
    }

    pub fn k(&self) -> usize {
        self.k.get()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn half_step(
        &self,
        model: &Model,
        vmap: &VarMap,
        units: &[UnitId],
        noise: &mut dyn NoiseSource,
    ) -> Result<GibbsStep> {
        gibbs_step(
            model,
            vmap,
            units,
            &self.mean_field_for_stats,
            &self.mean_field_for_gibbs,
            noise,
        )
    }

    /// One iteration of the chain: hidden to visible, then visible to hidden.
    ///
    /// Only the gibbs values move on to the next iteration, the record is dropped unless this
    /// is the last one.
    pub fn step(
        &self,
        model: &Model,
        context: &VarMap,
        state: ChainState,
        noise: &mut dyn NoiseSource,
    ) -> Result<(ChainState, StepRecord)> {
        let down = self.half_step(model, &state.hidden.merged(context), &self.visible, noise)?;
        let up = self.half_step(model, &down.gibbs.clone().merged(context), &self.hidden, noise)?;

        let record = StepRecord {
            values: context.clone().merged(&down.stats).merged(&up.stats),
            activations: down.activation.merged(&up.activation),
        };

        Ok((ChainState { hidden: up.gibbs }, record))
    }

    /// Computes the statistics of a minibatch.
    ///
    /// `data` must hold the visible and context groups. A persistent engine starts its chain
    /// from `chain` instead of the data driven hidden sample, and the returned statistics carry
    /// the final hidden gibbs values to write back into it.
    ///
    /// # Errors
    /// `StructuralMismatch` if a chain is missing for a persistent engine or given to a
    /// non persistent one, `ShapeMismatch` if the visible and context groups disagree on the
    /// batch size or the chain's batch differs from theirs.
    pub fn run(
        &self,
        model: &Model,
        data: &VarMap,
        chain: Option<&PersistentChain>,
        noise: &mut dyn NoiseSource,
    ) -> Result<Stats> {
        let chain = match (self.persistent, chain) {
            (true, Some(chain)) => Some(chain),
            (false, None) => None,
            (true, None) => {
                return Err(RbmErr::StructuralMismatch(
                    "persistent contrastive divergence needs a persistent chain".to_string(),
                ));
            }
            (false, Some(_)) => {
                return Err(RbmErr::StructuralMismatch(
                    "a persistent chain was given to a non persistent engine".to_string(),
                ));
            }
        };

        let clamped_groups = data.restricted(&[self.visible.as_slice(), self.context.as_slice()].concat());
        let batch = clamped_groups.uniform_batch_size()?.unwrap_or(0);
        let context = model.complete_vmap(&data.restricted(&self.context))?;
        let clamped = model
            .complete_vmap(&data.restricted(&self.visible))?
            .merged(&context);

        let positive = self.half_step(model, &clamped, &self.hidden, noise)?;
        let data_phase = PhaseRecord {
            values: clamped.merged(&positive.stats),
            activations: positive.activation,
        };

        let mut state = match chain {
            Some(chain) => {
                let particles = chain.batch_size().unwrap_or(0);
                if particles != batch {
                    return Err(RbmErr::shape("persistent chain", &[particles], &[batch]));
                }

                debug!(batch = batch; "seeding the chain from the persistent state");
                ChainState {
                    hidden: chain.hidden().clone(),
                }
            }
            None => ChainState {
                hidden: positive.gibbs,
            },
        };

        debug!(k = self.k.get(), persistent = self.persistent; "running gibbs chain");

        let mut last = None;
        for _ in 0..self.k.get() {
            let (next, record) = self.step(model, &context, state, noise)?;
            state = next;
            last = Some(record);
        }

        let model_phase = last
            .map(|r| PhaseRecord {
                values: r.values,
                activations: r.activations,
            })
            .unwrap_or_default();

        let write = self.persistent.then(|| PersistentWrite {
            hidden: state.hidden,
        });

        Ok(Stats {
            data: data_phase,
            model: model_phase,
            write,
        })
    }
}
