use crate::tensor::Tensor;

/// The deterministic function a proxy unit group applies to its primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFn {
    Square,
    Log,
}

impl ProxyFn {
    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            ProxyFn::Square => x.mapv(|v| v * v),
            ProxyFn::Log => x.mapv(f32::ln),
        }
    }

    /// The suffix appended to the primary's name to name the proxy group.
    pub fn suffix(self) -> &'static str {
        match self {
            ProxyFn::Square => "precision",
            ProxyFn::Log => "log",
        }
    }

    pub(crate) fn proxy_name(self, primary: &str) -> String {
        format!("{primary}_{}", self.suffix())
    }
}

/// The operations a distribution kind may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Sample,
    MeanField,
    FreeEnergy,
    LogProb,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Sample => "sample",
            Capability::MeanField => "mean_field",
            Capability::FreeEnergy => "free_energy_term",
            Capability::LogProb => "log_prob",
        }
    }
}

/// The distribution of a unit group given its activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Bernoulli units in `{0, 1}`.
    Binary,
    /// Binary units in `{-1, 1}`.
    SymmetricBinary,
    /// Unit variance Gaussian units.
    Gaussian,
    /// Gaussian units whose precision is learnt through a `Square` proxy.
    LearntPrecisionGaussian,
    /// One-hot units along the last axis.
    Softmax,
    /// Like `Softmax`, plus an implicit all-zeros state of energy zero.
    SoftmaxWithZero,
    /// Exponential units truncated to `[0, 1]`.
    TruncatedExponential,
    /// Exponential units on `[0, ∞)`.
    Exponential,
    /// Gamma units, the shape is driven through a `Log` proxy.
    Gamma,
    /// Deterministic context, never sampled.
    Bare,
    Proxy(ProxyFn),
}

use UnitKind::*;

impl UnitKind {
    pub fn name(self) -> &'static str {
        match self {
            Binary => "binary",
            SymmetricBinary => "symmetric_binary",
            Gaussian => "gaussian",
            LearntPrecisionGaussian => "learnt_precision_gaussian",
            Softmax => "softmax",
            SoftmaxWithZero => "softmax_with_zero",
            TruncatedExponential => "truncated_exponential",
            Exponential => "exponential",
            Gamma => "gamma",
            Bare => "bare",
            Proxy(ProxyFn::Square) => "proxy(square)",
            Proxy(ProxyFn::Log) => "proxy(log)",
        }
    }

    /// The capability table: every stochastic kind defines every operation, bare and proxy
    /// groups define none.
    pub fn supports(self, capability: Capability) -> bool {
        match (self, capability) {
            (Bare | Proxy(_), _) => false,
            (
                Binary
                | SymmetricBinary
                | Gaussian
                | LearntPrecisionGaussian
                | Softmax
                | SoftmaxWithZero
                | TruncatedExponential
                | Exponential
                | Gamma,
                Capability::Sample
                | Capability::MeanField
                | Capability::FreeEnergy
                | Capability::LogProb,
            ) => true,
        }
    }

    /// The proxy this kind needs to be fully parameterized, if any.
    pub fn required_proxy(self) -> Option<ProxyFn> {
        match self {
            LearntPrecisionGaussian => Some(ProxyFn::Square),
            Gamma => Some(ProxyFn::Log),
            _ => None,
        }
    }
}
