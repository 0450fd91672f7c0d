use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{RbmErr, Result};

/// The specification for the `ContrastiveDivergence` engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdConfig {
    /// The groups clamped to the data in the positive phase.
    pub visible: Vec<String>,
    /// The groups inferred from the visible ones. Defaults to every group sharing a parameter
    /// set with the visible and context groups.
    #[serde(default)]
    pub hidden: Vec<String>,
    /// Groups read from the data but never resampled.
    #[serde(default)]
    pub context: Vec<String>,
    pub k: NonZeroUsize,
    #[serde(default)]
    pub persistent: bool,
    /// Groups whose statistics use their mean field rather than a sample.
    #[serde(default)]
    pub mean_field_for_stats: Vec<String>,
    /// Groups propagating their mean field along the chain rather than a sample.
    #[serde(default)]
    pub mean_field_for_gibbs: Vec<String>,
}

impl CdConfig {
    /// CD-k between a visible and a hidden group, sampling everything.
    pub fn new(visible: &str, hidden: &str, k: NonZeroUsize) -> Self {
        Self {
            visible: vec![visible.to_string()],
            hidden: vec![hidden.to_string()],
            context: vec![],
            k,
            persistent: false,
            mean_field_for_stats: vec![],
            mean_field_for_gibbs: vec![],
        }
    }
}

/// Which side of a bound a tensor's entries must stay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundKind {
    Upper,
    Lower,
}

/// Rejects the updates of a tensor that would cross `bound`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundSpec {
    pub tensor: String,
    pub bound: f32,
    pub kind: BoundKind,
}

/// Pushes the mean activity of a unit group towards `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparsitySpec {
    pub unit: String,
    pub target: f32,
    pub cost: f32,
}

/// The reductions reported after every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorSpec {
    ReconstructionMse,
    ReconstructionCrossEntropy,
}

/// The specification for the `Trainer` struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub cd: CdConfig,
    pub learning_rate: f32,
    /// Decay of the momentum accumulators, zero disables momentum.
    #[serde(default)]
    pub momentum: f32,
    /// L2 penalty applied to every tensor of rank two or more.
    #[serde(default)]
    pub weight_decay: f32,
    #[serde(default)]
    pub sparsity: Vec<SparsitySpec>,
    #[serde(default)]
    pub bounds: Vec<BoundSpec>,
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
    pub batch_size: NonZeroUsize,
    pub epochs: NonZeroUsize,
    #[serde(default)]
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl TrainingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RbmErr::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_config_from_json() {
        let json = r#"{
            "cd": {
                "visible": ["v"],
                "k": 3,
                "persistent": true,
                "mean_field_for_stats": ["h"]
            },
            "learning_rate": 0.1,
            "momentum": 0.9,
            "bounds": [{ "tensor": "bv", "bound": 1.0, "kind": "upper" }],
            "monitors": ["reconstruction_mse"],
            "batch_size": 10,
            "epochs": 2,
            "seed": 7
        }"#;

        let config = TrainingConfig::from_json(json).unwrap();
        assert_eq!(config.cd.k.get(), 3);
        assert!(config.cd.persistent);
        assert!(config.cd.hidden.is_empty());
        assert_eq!(config.bounds[0].kind, BoundKind::Upper);
        assert_eq!(config.monitors, vec![MonitorSpec::ReconstructionMse]);
        assert_eq!(config.weight_decay, 0.);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn zero_counts_are_rejected() {
        let json = r#"{
            "cd": { "visible": ["v"], "k": 0 },
            "learning_rate": 0.1,
            "batch_size": 10,
            "epochs": 2,
            "seed": null
        }"#;

        assert!(matches!(
            TrainingConfig::from_json(json),
            Err(RbmErr::InvalidConfig(_))
        ));
    }
}
