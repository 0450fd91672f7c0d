use serde::{Deserialize, Serialize};

use crate::{
    RbmErr, Result,
    params::Transform,
    units::{ProxyFn, UnitKind},
};

/// The specification for a unit group's distribution kind.
///
/// Proxy kinds can't be declared, they are created by the builder for the kinds that need one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKindSpec {
    Binary,
    SymmetricBinary,
    Gaussian,
    LearntPrecisionGaussian,
    Softmax,
    SoftmaxWithZero,
    TruncatedExponential,
    Exponential,
    Gamma,
    Bare,
}

impl From<UnitKindSpec> for UnitKind {
    fn from(value: UnitKindSpec) -> Self {
        match value {
            UnitKindSpec::Binary => UnitKind::Binary,
            UnitKindSpec::SymmetricBinary => UnitKind::SymmetricBinary,
            UnitKindSpec::Gaussian => UnitKind::Gaussian,
            UnitKindSpec::LearntPrecisionGaussian => UnitKind::LearntPrecisionGaussian,
            UnitKindSpec::Softmax => UnitKind::Softmax,
            UnitKindSpec::SoftmaxWithZero => UnitKind::SoftmaxWithZero,
            UnitKindSpec::TruncatedExponential => UnitKind::TruncatedExponential,
            UnitKindSpec::Exponential => UnitKind::Exponential,
            UnitKindSpec::Gamma => UnitKind::Gamma,
            UnitKindSpec::Bare => UnitKind::Bare,
        }
    }
}

/// The specification for a `UnitGroup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    /// The shape of one example, without the batch axis.
    pub shape: Vec<usize>,
    pub kind: UnitKindSpec,
}

impl UnitSpec {
    pub fn new(name: &str, shape: Vec<usize>, kind: UnitKindSpec) -> Self {
        Self {
            name: name.to_string(),
            shape,
            kind,
        }
    }
}

/// How a weight tensor is filled in when the model is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    /// Explicit values in row major order.
    Values { values: Vec<f32> },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    Kaiming,
}

impl InitSpec {
    pub fn zeros() -> Self {
        Self::Const { value: 0. }
    }
}

/// The specification for a named weight tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: InitSpec,
}

impl TensorSpec {
    pub fn new(name: &str, shape: Vec<usize>, init: InitSpec) -> Self {
        Self {
            name: name.to_string(),
            shape,
            init,
        }
    }
}

/// The specification for the `ParamSet` enum.
///
/// Unit groups and tensors are referred to by name. Naming the same group or tensor twice ties
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSpec {
    Bias {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    SharedBias {
        units: Vec<String>,
        tensors: Vec<String>,
        /// How many trailing axes of the group share a single bias entry.
        shared_axes: usize,
    },
    Prod {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    AdvancedProd {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    Conv2d {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    ThirdOrder {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    ThirdOrderFactored {
        units: Vec<String>,
        tensors: Vec<String>,
    },
    Transformed {
        transform: Transform,
        raw: String,
        inner: Box<ParamSpec>,
    },
    /// Multiplicative composition through a synthetic `Bare` group of `size` units named
    /// `name`. Every sub set must bind that group.
    Factor {
        name: String,
        size: usize,
        params: Vec<ParamSpec>,
    },
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl ParamSpec {
    pub fn bias(unit: &str, tensor: &str) -> Self {
        Self::Bias {
            units: names(&[unit]),
            tensors: names(&[tensor]),
        }
    }

    pub fn shared_bias(unit: &str, tensor: &str, shared_axes: usize) -> Self {
        Self::SharedBias {
            units: names(&[unit]),
            tensors: names(&[tensor]),
            shared_axes,
        }
    }

    pub fn prod(a: &str, b: &str, tensor: &str) -> Self {
        Self::Prod {
            units: names(&[a, b]),
            tensors: names(&[tensor]),
        }
    }

    pub fn advanced_prod(a: &str, b: &str, tensor: &str) -> Self {
        Self::AdvancedProd {
            units: names(&[a, b]),
            tensors: names(&[tensor]),
        }
    }

    pub fn conv2d(visible: &str, hidden: &str, filters: &str) -> Self {
        Self::Conv2d {
            units: names(&[visible, hidden]),
            tensors: names(&[filters]),
        }
    }

    pub fn transformed(transform: Transform, raw: &str, inner: ParamSpec) -> Self {
        Self::Transformed {
            transform,
            raw: raw.to_string(),
            inner: Box::new(inner),
        }
    }
}

/// The specification for a `Model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub units: Vec<UnitSpec>,
    pub tensors: Vec<TensorSpec>,
    pub params: Vec<ParamSpec>,
}

impl ModelSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RbmErr::InvalidConfig(e.to_string()))
    }
}

/// The name of the proxy group the builder creates for a primary of the given kind.
pub(crate) fn proxy_for(kind: UnitKind, primary: &str) -> Option<(ProxyFn, String)> {
    kind.required_proxy()
        .map(|f| (f, f.proxy_name(primary)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_from_json() {
        let json = r#"{
            "units": [
                { "name": "v", "shape": [6], "kind": "binary" },
                { "name": "h", "shape": [3], "kind": "learnt_precision_gaussian" }
            ],
            "tensors": [
                { "name": "w", "shape": [6, 3], "init": { "normal": { "mean": 0.0, "std_dev": 0.01 } } },
                { "name": "bv", "shape": [6], "init": "xavier_uniform" },
                { "name": "raw", "shape": [3], "init": { "const": { "value": 0.0 } } }
            ],
            "params": [
                { "prod": { "units": ["v", "h"], "tensors": ["w"] } },
                { "bias": { "units": ["v"], "tensors": ["bv"] } },
                {
                    "transformed": {
                        "transform": "neg_softplus",
                        "raw": "raw",
                        "inner": { "bias": { "units": ["h_precision"], "tensors": ["raw"] } }
                    }
                },
                {
                    "factor": {
                        "name": "f",
                        "size": 2,
                        "params": [
                            { "prod": { "units": ["v", "f"], "tensors": ["a"] } },
                            { "prod": { "units": ["h", "f"], "tensors": ["b"] } }
                        ]
                    }
                }
            ]
        }"#;

        let spec = ModelSpec::from_json(json).unwrap();
        assert_eq!(spec.units[1].kind, UnitKindSpec::LearntPrecisionGaussian);
        assert_eq!(spec.tensors[1].init, InitSpec::XavierUniform);
        assert!(matches!(
            &spec.params[2],
            ParamSpec::Transformed { transform: Transform::NegSoftplus, .. }
        ));
        assert!(matches!(&spec.params[3], ParamSpec::Factor { size: 2, params, .. } if params.len() == 2));
    }

    #[test]
    fn proxy_kinds_cant_be_declared() {
        let json = r#"{ "name": "p", "shape": [2], "kind": "proxy" }"#;
        assert!(serde_json::from_str::<UnitSpec>(json).is_err());
    }

    #[test]
    fn proxies_are_named_after_their_primary() {
        let (f, name) = proxy_for(UnitKind::Gamma, "g").unwrap();
        assert_eq!(f, ProxyFn::Log);
        assert_eq!(name, "g_log");
        assert!(proxy_for(UnitKind::Binary, "v").is_none());
    }
}
