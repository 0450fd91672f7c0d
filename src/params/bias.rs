use ndarray::{Array1, Axis};

use super::{Binding, arity, batch_size, expect_shape, unbound, unowned};
use crate::{
    RbmErr, Result,
    tensor::{Tensor, TensorId, TensorLookup, Weights, mean_trailing, sum_except_batch},
    units::{UnitId, VarMap},
};

/// First order term: `-Σ b ⊙ x`.
#[derive(Debug, Clone)]
pub struct Bias {
    unit: Binding,
    b: TensorId,
}

impl Bias {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>) -> Result<Self> {
        let [unit] = arity("a bias", "unit group", units)?;
        let [b] = arity("a bias", "tensor", tensors)?;
        Ok(Self { unit, b })
    }

    pub fn unit(&self) -> UnitId {
        self.unit.unit
    }

    pub fn variable(&self) -> TensorId {
        self.b
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        expect_shape(weights.name(self.b)?, weights.get(self.b)?.shape(), &self.unit.shape)
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        if unit != self.unit.unit {
            return Err(unbound(unit));
        }

        let shape = self.unit.batched(batch_size(vmap));
        broadcast(w.tensor(self.b)?, &shape)
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let x = self.unit.value(vmap)?;
        Ok(-sum_except_batch(&(x * w.tensor(self.b)?))?)
    }

    pub(crate) fn energy_gradient(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        if var != self.b {
            return Err(unowned(var));
        }

        Ok(self.unit.value(vmap)?.clone())
    }

    pub(crate) fn energy_gradient_sum(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        Ok(self.energy_gradient(var, vmap)?.sum_axis(Axis(0)))
    }
}

/// A bias shared along the trailing axes of a group, e.g. one bias per feature map of a
/// convolutional layer.
///
/// The tensor has the group's leading axes; it is broadcast over the trailing ones in the
/// activation and energy, and the gradient averages the group's value over them.
#[derive(Debug, Clone)]
pub struct SharedBias {
    unit: Binding,
    b: TensorId,
    shared_axes: usize,
}

impl SharedBias {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>, shared_axes: usize) -> Result<Self> {
        let [unit] = arity("a shared bias", "unit group", units)?;
        let [b] = arity("a shared bias", "tensor", tensors)?;

        if shared_axes >= unit.shape.len() {
            return Err(RbmErr::StructuralMismatch(format!(
                "a shared bias can't share {shared_axes} axes of a rank {} group",
                unit.shape.len()
            )));
        }

        Ok(Self {
            unit,
            b,
            shared_axes,
        })
    }

    pub fn unit(&self) -> UnitId {
        self.unit.unit
    }

    pub fn variable(&self) -> TensorId {
        self.b
    }

    fn kept_shape(&self) -> &[usize] {
        &self.unit.shape[..self.unit.shape.len() - self.shared_axes]
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        expect_shape(weights.name(self.b)?, weights.get(self.b)?.shape(), self.kept_shape())
    }

    /// The bias with unit length trailing axes appended, ready to broadcast.
    fn expanded(&self, b: &Tensor) -> Result<Tensor> {
        let mut shape = b.shape().to_vec();
        shape.extend(std::iter::repeat_n(1, self.shared_axes));
        Ok(b.to_shape(shape)?.into_owned())
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        if unit != self.unit.unit {
            return Err(unbound(unit));
        }

        let shape = self.unit.batched(batch_size(vmap));
        broadcast(&self.expanded(w.tensor(self.b)?)?, &shape)
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let x = self.unit.value(vmap)?;
        let b = self.expanded(w.tensor(self.b)?)?;
        Ok(-sum_except_batch(&(x * &b))?)
    }

    pub(crate) fn energy_gradient(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        if var != self.b {
            return Err(unowned(var));
        }

        mean_trailing(self.unit.value(vmap)?, self.shared_axes)
    }

    pub(crate) fn energy_gradient_sum(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        Ok(self.energy_gradient(var, vmap)?.sum_axis(Axis(0)))
    }
}

fn broadcast(b: &Tensor, shape: &[usize]) -> Result<Tensor> {
    b.broadcast(shape)
        .map(|view| view.to_owned())
        .ok_or_else(|| RbmErr::shape("bias", b.shape(), shape))
}
