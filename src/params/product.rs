use ndarray::{Array1, Array2, Axis, CowArray, Ix2};

use super::{Binding, accumulate, arity, expect_shape, outer_rows, reshape, unbound, unowned};
use crate::{
    RbmErr, Result,
    tensor::{Tensor, TensorId, TensorLookup, Weights},
    units::{UnitId, VarMap},
};

/// Bilinear term `-Σ a ⊙ (W · b)` between two unit groups.
///
/// The weight's shape is the first group's shape followed by the second's, both groups are
/// flattened to contract them.
#[derive(Debug, Clone)]
pub struct Product {
    a: Binding,
    b: Binding,
    w: TensorId,
}

impl Product {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>) -> Result<Self> {
        let [a, b] = arity("a product", "unit groups", units)?;
        let [w] = arity("a product", "tensor", tensors)?;
        Ok(Self { a, b, w })
    }

    pub fn units(&self) -> Vec<UnitId> {
        vec![self.a.unit, self.b.unit]
    }

    pub fn variable(&self) -> TensorId {
        self.w
    }

    fn weight_shape(&self) -> Vec<usize> {
        [self.a.shape.as_slice(), self.b.shape.as_slice()].concat()
    }

    pub(crate) fn validate(&self, weights: &Weights, any_rank: bool) -> Result<()> {
        if !any_rank && (self.a.shape.len() != 1 || self.b.shape.len() != 1) {
            return Err(RbmErr::StructuralMismatch(
                "a plain product binds vector unit groups, use an advanced product for higher \
                 rank groups"
                    .to_string(),
            ));
        }

        expect_shape(
            weights.name(self.w)?,
            weights.get(self.w)?.shape(),
            &self.weight_shape(),
        )
    }

    fn matrix<'a>(&self, w: &'a dyn TensorLookup) -> Result<CowArray<'a, f32, Ix2>> {
        Ok(w.tensor(self.w)?.to_shape((self.a.size(), self.b.size()))?)
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let m = self.matrix(w)?;
        let mut term = None;

        if unit == self.a.unit {
            let b = self.b.flat(vmap)?;
            let t = b.dot(&m.t()).into_dyn();
            term = Some(accumulate(term, reshape(t, self.a.batched(b.nrows()))?));
        }

        if unit == self.b.unit {
            let a = self.a.flat(vmap)?;
            let t = a.dot(&m).into_dyn();
            term = Some(accumulate(term, reshape(t, self.b.batched(a.nrows()))?));
        }

        term.ok_or_else(|| unbound(unit))
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let m = self.matrix(w)?;
        let a = self.a.flat(vmap)?;
        let b = self.b.flat(vmap)?;

        Ok(-(a.dot(&m) * b).sum_axis(Axis(1)))
    }

    fn flats(&self, var: TensorId, vmap: &VarMap) -> Result<(Array2<f32>, Array2<f32>)> {
        if var != self.w {
            return Err(unowned(var));
        }

        Ok((self.a.flat(vmap)?, self.b.flat(vmap)?))
    }

    pub(crate) fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        _: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let (a, b) = self.flats(var, vmap)?;
        let batch = a.nrows();

        let mut shape = vec![batch];
        shape.extend(self.weight_shape());
        reshape(outer_rows(a.view(), b.view())?.into_dyn(), shape)
    }

    pub(crate) fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        _: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let (a, b) = self.flats(var, vmap)?;
        reshape(a.t().dot(&b).into_dyn(), self.weight_shape())
    }
}
