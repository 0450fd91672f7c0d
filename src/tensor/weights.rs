use super::Tensor;
use crate::{RbmErr, Result};

/// Handle of a weight tensor inside a `Weights` arena.
///
/// Parameter sets referencing the same handle share (tie) that tensor, their gradients land in
/// the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    /// Returns the position of the tensor inside its arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Read access to weight tensors by handle.
pub trait TensorLookup {
    /// # Errors
    /// `UnknownTensor` if the handle belongs to another arena.
    fn tensor(&self, id: TensorId) -> Result<&Tensor>;
}

fn unknown(id: TensorId) -> RbmErr {
    RbmErr::UnknownTensor(format!("#{}", id.0))
}

/// The arena owning every weight tensor of a model.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    names: Vec<String>,
    values: Vec<Tensor>,
}

impl Weights {
    /// Creates an empty `Weights` arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new tensor.
    ///
    /// # Arguments
    /// * `name` - A unique name for the tensor.
    /// * `value` - Its initial value.
    ///
    /// # Returns
    /// The handle of the tensor, or an error if the name is already taken.
    pub fn push(&mut self, name: &str, value: Tensor) -> Result<TensorId> {
        if self.id(name).is_some() {
            return Err(RbmErr::StructuralMismatch(format!(
                "tensor '{name}' is registered twice"
            )));
        }

        self.names.push(name.to_string());
        self.values.push(value);
        Ok(TensorId(self.values.len() - 1))
    }

    /// Looks a tensor up by name.
    pub fn id(&self, name: &str) -> Option<TensorId> {
        self.names.iter().position(|n| n == name).map(TensorId)
    }

    pub fn name(&self, id: TensorId) -> Result<&str> {
        self.names
            .get(id.0)
            .map(String::as_str)
            .ok_or_else(|| unknown(id))
    }

    pub fn get(&self, id: TensorId) -> Result<&Tensor> {
        self.values.get(id.0).ok_or_else(|| unknown(id))
    }

    /// Replaces the value of a tensor, its shape must not change.
    pub fn set(&mut self, id: TensorId, value: Tensor) -> Result<()> {
        let (Some(name), Some(slot)) = (self.names.get(id.0), self.values.get_mut(id.0)) else {
            return Err(unknown(id));
        };

        if slot.shape() != value.shape() {
            return Err(RbmErr::shape(
                format!("tensor '{name}'"),
                value.shape(),
                slot.shape(),
            ));
        }

        *slot = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TensorId> + use<> {
        (0..self.values.len()).map(TensorId)
    }
}

impl TensorLookup for Weights {
    fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.get(id)
    }
}

/// A view over another lookup where a single tensor is replaced by a different value.
///
/// Used by reparameterized parameter sets: the wrapped set sees `f(raw)` where the arena holds
/// `raw`.
pub struct Substituted<'a> {
    base: &'a dyn TensorLookup,
    id: TensorId,
    value: Tensor,
}

impl<'a> Substituted<'a> {
    pub fn new(base: &'a dyn TensorLookup, id: TensorId, value: Tensor) -> Self {
        Self { base, id, value }
    }
}

impl TensorLookup for Substituted<'_> {
    fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        if id == self.id {
            Ok(&self.value)
        } else {
            self.base.tensor(id)
        }
    }
}
