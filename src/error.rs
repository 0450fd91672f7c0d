use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::{NormalError, uniform::Error as UniformError};

use crate::units::UnitId;

/// The result type used across the whole crate.
pub type Result<T> = std::result::Result<T, RbmErr>;

/// The crate's error type.
///
/// Everything but `Engine` and `MissingValue` is raised while building a model, a trainer or
/// resolving a configuration, before any sampling takes place.
#[derive(Debug)]
pub enum RbmErr {
    /// The distribution kind of a unit group doesn't define the requested operation.
    UnsupportedOperation {
        group: String,
        kind: &'static str,
        op: &'static str,
    },
    /// A factor was queried before being finalized.
    NotInitialized { factor: String },
    /// A component was assembled from parts that don't fit together (wrong arity, updaters
    /// targeting different tensors, sub parameter sets not bound to their factor...).
    StructuralMismatch(String),
    /// Two tensors disagree on their dimensions.
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A reshape or view failed inside `ndarray`.
    Engine(ShapeError),
    /// A variable map has no value for a unit group that the operation needs.
    MissingValue { unit: UnitId },
    UnknownUnit(String),
    UnknownTensor(String),
    InvalidConfig(String),
}

impl Display for RbmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbmErr::UnsupportedOperation { group, kind, op } => {
                write!(f, "unit group '{group}' of kind {kind} doesn't support {op}")
            }
            RbmErr::NotInitialized { factor } => {
                write!(f, "factor '{factor}' was used before being finalized")
            }
            RbmErr::StructuralMismatch(msg) => write!(f, "structural mismatch: {msg}"),
            RbmErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {got:?}, expected {expected:?}"
            ),
            RbmErr::Engine(e) => write!(f, "tensor engine error: {e}"),
            RbmErr::MissingValue { unit } => {
                write!(f, "the variable map has no value for unit group #{}", unit.index())
            }
            RbmErr::UnknownUnit(name) => write!(f, "unknown unit group '{name}'"),
            RbmErr::UnknownTensor(name) => write!(f, "unknown tensor '{name}'"),
            RbmErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for RbmErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RbmErr::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for RbmErr {
    fn from(value: ShapeError) -> Self {
        Self::Engine(value)
    }
}

impl From<NormalError> for RbmErr {
    fn from(value: NormalError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

impl From<UniformError> for RbmErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

impl RbmErr {
    pub(crate) fn shape(what: impl Into<String>, got: &[usize], expected: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            got: got.to_vec(),
            expected: expected.to_vec(),
        }
    }
}
