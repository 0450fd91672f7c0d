//! Gibbs sampling and contrastive divergence statistics.

mod cd;
mod gibbs;

pub use cd::{
    ChainState, ContrastiveDivergence, PersistentChain, PersistentWrite, Phase, PhaseRecord,
    Stats, StepRecord,
};
pub use gibbs::{GibbsStep, gibbs_step};
