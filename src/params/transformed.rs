use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::ParamSet;
use crate::{
    RbmErr, Result,
    tensor::{Substituted, Tensor, TensorId, TensorLookup, sigmoid, softplus},
    units::{UnitId, VarMap},
};

/// A pointwise reparameterization of a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Exp,
    /// Keeps the weight strictly negative.
    NegExp,
    Softplus,
    NegSoftplus,
    Square,
}

impl Transform {
    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            Transform::Exp => x.mapv(f32::exp),
            Transform::NegExp => x.mapv(|v| -v.exp()),
            Transform::Softplus => x.mapv(softplus),
            Transform::NegSoftplus => x.mapv(|v| -softplus(v)),
            Transform::Square => x.mapv(|v| v * v),
        }
    }

    pub fn derivative(self, x: &Tensor) -> Tensor {
        match self {
            Transform::Exp => x.mapv(f32::exp),
            Transform::NegExp => x.mapv(|v| -v.exp()),
            Transform::Softplus => sigmoid(x),
            Transform::NegSoftplus => -sigmoid(x),
            Transform::Square => x * 2.,
        }
    }
}

/// Wraps a parameter set so that it sees `f(raw)` wherever the arena holds `raw`.
///
/// Gradients with respect to the raw tensor go through the chain rule.
#[derive(Debug, Clone)]
pub struct Transformed {
    inner: Box<ParamSet>,
    raw: TensorId,
    transform: Transform,
}

impl Transformed {
    pub fn new(inner: ParamSet, raw: TensorId, transform: Transform) -> Result<Self> {
        if !inner.owns(raw) {
            return Err(RbmErr::StructuralMismatch(format!(
                "the transformed tensor #{} isn't used by the wrapped parameter set",
                raw.index()
            )));
        }

        Ok(Self {
            inner: Box::new(inner),
            raw,
            transform,
        })
    }

    pub fn inner(&self) -> &ParamSet {
        &self.inner
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    fn view<'a>(&self, w: &'a dyn TensorLookup) -> Result<Substituted<'a>> {
        let value = self.transform.apply(w.tensor(self.raw)?);
        Ok(Substituted::new(w, self.raw, value))
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        self.inner.activation_term(unit, vmap, &self.view(w)?)
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        self.inner.energy_term(vmap, &self.view(w)?)
    }

    pub(crate) fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let grad = self.inner.energy_gradient(var, vmap, &self.view(w)?)?;
        self.chain(var, grad, w)
    }

    pub(crate) fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let grad = self.inner.energy_gradient_sum(var, vmap, &self.view(w)?)?;
        self.chain(var, grad, w)
    }

    fn chain(&self, var: TensorId, grad: Tensor, w: &dyn TensorLookup) -> Result<Tensor> {
        if var != self.raw {
            return Ok(grad);
        }

        Ok(grad * &self.transform.derivative(w.tensor(self.raw)?))
    }
}
