//! Composable energy based models.
//!
//! A model is declared as unit groups connected by parameter sets ([`model::ModelSpec`]),
//! assembled by [`model::ModelBuilder`] and trained by contrastive divergence
//! ([`stats::ContrastiveDivergence`]) through updater trees ([`updaters::Updater`]) driven by a
//! [`training::Trainer`].

mod error;

pub mod model;
pub mod monitors;
pub mod params;
pub mod sampling;
pub mod stats;
pub mod tensor;
pub mod training;
pub mod units;
pub mod updaters;

pub use error::{RbmErr, Result};
