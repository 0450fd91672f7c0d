//! Parameter sets: the interaction terms of a model's energy.
//!
//! Every set binds a fixed list of unit groups and references weight tensors by handle. Energies
//! are returned per example, and gradients are gradients of the *negative* energy, so that the
//! gradient of a bilinear set with respect to its weight is `Vᵀ·H`.

mod bias;
mod conv;
mod factor;
mod product;
mod third_order;
mod transformed;

pub use bias::{Bias, SharedBias};
pub use conv::Conv2d;
pub use factor::Factor;
pub use product::Product;
pub use third_order::{FactoredThirdOrder, ThirdOrder};
pub use transformed::{Transform, Transformed};

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::{
    RbmErr, Result,
    tensor::{Tensor, TensorId, TensorLookup, Weights, flatten_batch},
    units::{UnitId, VarMap},
};

/// A unit group as seen by a parameter set: its handle and the shape of one example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub unit: UnitId,
    pub shape: Vec<usize>,
}

impl Binding {
    pub fn new(unit: UnitId, shape: Vec<usize>) -> Self {
        Self { unit, shape }
    }

    /// The amount of scalar units in one example.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// The shape of a whole minibatch of this group.
    pub fn batched(&self, batch: usize) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        shape.push(batch);
        shape.extend_from_slice(&self.shape);
        shape
    }

    /// Fetches the group's value, checking it has the bound shape and the map's batch size.
    pub fn value<'a>(&self, vmap: &'a VarMap) -> Result<&'a Tensor> {
        let value = vmap.require(self.unit)?;
        let batch = vmap.batch_size().unwrap_or(0);
        if value.ndim() == 0
            || value.shape()[0] != batch
            || value.shape()[1..] != self.shape[..]
        {
            return Err(RbmErr::shape(
                format!("value of unit group #{}", self.unit.index()),
                value.shape(),
                &self.batched(batch),
            ));
        }

        Ok(value)
    }

    /// The group's value as a `[batch, size]` matrix.
    pub fn flat(&self, vmap: &VarMap) -> Result<Array2<f32>> {
        flatten_batch(self.value(vmap)?)
    }
}

/// An interaction term of the energy function.
#[derive(Debug, Clone)]
pub enum ParamSet {
    Bias(Bias),
    SharedBias(SharedBias),
    /// Bilinear term between two vector groups.
    Prod(Product),
    /// Bilinear term between groups of any rank, contracting all their axes.
    AdvancedProd(Product),
    Conv2d(Conv2d),
    ThirdOrder(ThirdOrder),
    ThirdOrderFactored(FactoredThirdOrder),
    Transformed(Transformed),
    Factor(Factor),
}

use ParamSet::*;

impl ParamSet {
    /// The unit groups this set binds, once per position (tied groups repeat).
    pub fn units(&self) -> Vec<UnitId> {
        match self {
            Bias(p) => vec![p.unit()],
            SharedBias(p) => vec![p.unit()],
            Prod(p) | AdvancedProd(p) => p.units(),
            Conv2d(p) => p.units(),
            ThirdOrder(p) => p.units(),
            ThirdOrderFactored(p) => p.units(),
            Transformed(p) => p.inner().units(),
            Factor(p) => p.units(),
        }
    }

    /// The weight tensors this set reads, once per position (tied tensors repeat).
    pub fn variables(&self) -> Vec<TensorId> {
        match self {
            Bias(p) => vec![p.variable()],
            SharedBias(p) => vec![p.variable()],
            Prod(p) | AdvancedProd(p) => vec![p.variable()],
            Conv2d(p) => vec![p.variable()],
            ThirdOrder(p) => vec![p.variable()],
            ThirdOrderFactored(p) => p.variables(),
            Transformed(p) => p.inner().variables(),
            Factor(p) => p.variables(),
        }
    }

    pub fn affects(&self, unit: UnitId) -> bool {
        self.units().contains(&unit)
    }

    pub fn owns(&self, var: TensorId) -> bool {
        self.variables().contains(&var)
    }

    /// This set's contribution to the activation of `unit`, shaped like a minibatch of it.
    pub fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        match self {
            Bias(p) => p.activation_term(unit, vmap, w),
            SharedBias(p) => p.activation_term(unit, vmap, w),
            Prod(p) | AdvancedProd(p) => p.activation_term(unit, vmap, w),
            Conv2d(p) => p.activation_term(unit, vmap, w),
            ThirdOrder(p) => p.activation_term(unit, vmap, w),
            ThirdOrderFactored(p) => p.activation_term(unit, vmap, w),
            Transformed(p) => p.activation_term(unit, vmap, w),
            Factor(p) => p.activation_term(unit, vmap, w),
        }
    }

    /// This set's energy, one value per example.
    pub fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        match self {
            Bias(p) => p.energy_term(vmap, w),
            SharedBias(p) => p.energy_term(vmap, w),
            Prod(p) | AdvancedProd(p) => p.energy_term(vmap, w),
            Conv2d(p) => p.energy_term(vmap, w),
            ThirdOrder(p) => p.energy_term(vmap, w),
            ThirdOrderFactored(p) => p.energy_term(vmap, w),
            Transformed(p) => p.energy_term(vmap, w),
            Factor(p) => p.energy_term(vmap, w),
        }
    }

    /// Gradient of the negative energy with respect to `var`, per example: the result has the
    /// shape of `var` with a leading batch axis.
    pub fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        match self {
            Bias(p) => p.energy_gradient(var, vmap),
            SharedBias(p) => p.energy_gradient(var, vmap),
            Prod(p) | AdvancedProd(p) => p.energy_gradient(var, vmap, w),
            Conv2d(p) => p.energy_gradient(var, vmap),
            ThirdOrder(p) => p.energy_gradient(var, vmap, w),
            ThirdOrderFactored(p) => p.energy_gradient(var, vmap, w),
            Transformed(p) => p.energy_gradient(var, vmap, w),
            Factor(p) => p.energy_gradient(var, vmap, w),
        }
    }

    /// Gradient of the negative energy with respect to `var`, summed over the minibatch.
    pub fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        match self {
            Bias(p) => p.energy_gradient_sum(var, vmap),
            SharedBias(p) => p.energy_gradient_sum(var, vmap),
            Prod(p) | AdvancedProd(p) => p.energy_gradient_sum(var, vmap, w),
            Conv2d(p) => p.energy_gradient_sum(var, vmap),
            ThirdOrder(p) => p.energy_gradient_sum(var, vmap, w),
            ThirdOrderFactored(p) => p.energy_gradient_sum(var, vmap, w),
            Transformed(p) => p.energy_gradient_sum(var, vmap, w),
            Factor(p) => p.energy_gradient_sum(var, vmap, w),
        }
    }

    /// Checks the referenced tensors against the bound groups' shapes.
    pub fn validate(&self, weights: &Weights) -> Result<()> {
        match self {
            Bias(p) => p.validate(weights),
            SharedBias(p) => p.validate(weights),
            Prod(p) => p.validate(weights, false),
            AdvancedProd(p) => p.validate(weights, true),
            Conv2d(p) => p.validate(weights),
            ThirdOrder(p) => p.validate(weights),
            ThirdOrderFactored(p) => p.validate(weights),
            Transformed(p) => p.inner().validate(weights),
            Factor(p) => p.validate(weights),
        }
    }
}

/// Checks a constructor received exactly `N` items.
pub(crate) fn arity<T, const N: usize>(variant: &str, what: &str, items: Vec<T>) -> Result<[T; N]> {
    let got = items.len();
    items.try_into().map_err(|_| {
        RbmErr::StructuralMismatch(format!("{variant} binds {N} {what}, got {got}"))
    })
}

pub(crate) fn unbound(unit: UnitId) -> RbmErr {
    RbmErr::StructuralMismatch(format!(
        "the parameter set doesn't bind unit group #{}",
        unit.index()
    ))
}

pub(crate) fn unowned(var: TensorId) -> RbmErr {
    RbmErr::StructuralMismatch(format!(
        "the parameter set doesn't own tensor #{}",
        var.index()
    ))
}

pub(crate) fn expect_shape(what: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(RbmErr::shape(what, got, expected))
    }
}

pub(crate) fn reshape(x: Tensor, shape: Vec<usize>) -> Result<Tensor> {
    Ok(x.as_standard_layout().into_owned().into_shape_with_order(shape)?)
}

/// Row-wise outer product: `[batch, n]` and `[batch, m]` into `[batch, n * m]`.
pub(crate) fn outer_rows(x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
    let (batch, n) = x.dim();
    let m = y.ncols();
    let product = &x.insert_axis(Axis(2)) * &y.insert_axis(Axis(1));
    Ok(product.into_shape_with_order((batch, n * m))?)
}

/// Adds an optional running sum and a new term.
pub(crate) fn accumulate(acc: Option<Tensor>, term: Tensor) -> Tensor {
    match acc {
        Some(acc) => acc + term,
        None => term,
    }
}

/// The minibatch size of a map, defaulting to a single example for empty maps.
pub(crate) fn batch_size(vmap: &VarMap) -> usize {
    vmap.batch_size().unwrap_or(1)
}
