//! Minibatch training: configuration, datasets and the trainer loop.

mod builder;
mod config;
mod dataset;
mod trainer;

pub use builder::TrainerBuilder;
pub use config::{BoundKind, BoundSpec, CdConfig, MonitorSpec, SparsitySpec, TrainingConfig};
pub use dataset::Dataset;
pub use trainer::{EpochReport, StepReport, Trainer};
