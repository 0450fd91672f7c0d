use ndarray::{Array1, Array2, Axis};

use super::{Binding, accumulate, arity, expect_shape, outer_rows, reshape, unbound, unowned};
use crate::{
    RbmErr, Result,
    tensor::{Tensor, TensorId, TensorLookup, Weights, sum_except_batch},
    units::{UnitId, VarMap},
};

/// The two positions other than `t`, in order.
fn others(t: usize) -> [usize; 2] {
    match t {
        0 => [1, 2],
        1 => [0, 2],
        _ => [0, 1],
    }
}

/// Trilinear term `-Σ W[i, j, k] a[i] b[j] c[k]` with one dense weight tensor.
#[derive(Debug, Clone)]
pub struct ThirdOrder {
    units: [Binding; 3],
    w: TensorId,
}

impl ThirdOrder {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>) -> Result<Self> {
        let units = arity("a third order term", "unit groups", units)?;
        let [w] = arity("a third order term", "tensor", tensors)?;
        Ok(Self { units, w })
    }

    pub fn units(&self) -> Vec<UnitId> {
        self.units.iter().map(|b| b.unit).collect()
    }

    pub fn variable(&self) -> TensorId {
        self.w
    }

    fn sizes(&self) -> [usize; 3] {
        [self.units[0].size(), self.units[1].size(), self.units[2].size()]
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        for b in &self.units {
            if b.shape.len() != 1 {
                return Err(RbmErr::StructuralMismatch(format!(
                    "a third order term binds vector unit groups, got {:?}",
                    b.shape
                )));
            }
        }

        expect_shape(weights.name(self.w)?, weights.get(self.w)?.shape(), &self.sizes())
    }

    /// The activation contribution through position `t`: the outer product of the two other
    /// groups contracted with the weight.
    fn term_at(&self, t: usize, vmap: &VarMap, w: &Tensor) -> Result<Tensor> {
        let [o1, o2] = others(t);
        let sizes = self.sizes();

        let x1 = self.units[o1].flat(vmap)?;
        let x2 = self.units[o2].flat(vmap)?;
        let outer = outer_rows(x1.view(), x2.view())?;

        let wp = w.view().permuted_axes(vec![t, o1, o2]);
        let wp = wp.to_shape((sizes[t], sizes[o1] * sizes[o2]))?;

        let term = outer.dot(&wp.t()).into_dyn();
        reshape(term, self.units[t].batched(outer.nrows()))
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let weight = w.tensor(self.w)?;
        let mut term = None;

        for t in 0..3 {
            if self.units[t].unit == unit {
                term = Some(accumulate(term, self.term_at(t, vmap, weight)?));
            }
        }

        term.ok_or_else(|| unbound(unit))
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let term = self.term_at(2, vmap, w.tensor(self.w)?)?;
        let c = self.units[2].value(vmap)?;
        Ok(-sum_except_batch(&(term * c))?)
    }

    fn flats(&self, var: TensorId, vmap: &VarMap) -> Result<[Array2<f32>; 3]> {
        if var != self.w {
            return Err(unowned(var));
        }

        Ok([
            self.units[0].flat(vmap)?,
            self.units[1].flat(vmap)?,
            self.units[2].flat(vmap)?,
        ])
    }

    pub(crate) fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        _: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let [a, b, c] = self.flats(var, vmap)?;
        let ab = outer_rows(a.view(), b.view())?;
        let abc = outer_rows(ab.view(), c.view())?;

        let mut shape = vec![abc.nrows()];
        shape.extend(self.sizes());
        reshape(abc.into_dyn(), shape)
    }

    pub(crate) fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        _: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let [a, b, c] = self.flats(var, vmap)?;
        let ab = outer_rows(a.view(), b.view())?;
        reshape(ab.t().dot(&c).into_dyn(), self.sizes().to_vec())
    }
}

/// Factored trilinear term: each group is projected into a shared factor space,
/// `-Σ_f (a·Wa)[f] (b·Wb)[f] (c·Wc)[f]`.
///
/// Groups and projections may repeat to tie them, every position contributes to the activation
/// of its group and to the gradient of its projection.
#[derive(Debug, Clone)]
pub struct FactoredThirdOrder {
    units: [Binding; 3],
    projections: [TensorId; 3],
}

impl FactoredThirdOrder {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>) -> Result<Self> {
        let units = arity("a factored third order term", "unit groups", units)?;
        let projections = arity("a factored third order term", "tensors", tensors)?;
        Ok(Self { units, projections })
    }

    pub fn units(&self) -> Vec<UnitId> {
        self.units.iter().map(|b| b.unit).collect()
    }

    pub fn variables(&self) -> Vec<TensorId> {
        self.projections.to_vec()
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        let factors = weights.get(self.projections[0])?.shape().last().copied();

        for (b, &p) in self.units.iter().zip(&self.projections) {
            let shape = weights.get(p)?.shape();
            let expected = [b.size(), factors.unwrap_or(0)];
            expect_shape(weights.name(p)?, shape, &expected)?;
        }

        Ok(())
    }

    fn projected(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<[Array2<f32>; 3]> {
        let project = |t: usize| -> Result<Array2<f32>> {
            let b = &self.units[t];
            let p = w.tensor(self.projections[t])?;
            let factors = p.shape().last().copied().unwrap_or(0);
            let p = p.to_shape((b.size(), factors))?;
            Ok(b.flat(vmap)?.dot(&p))
        };

        Ok([project(0)?, project(1)?, project(2)?])
    }

    /// Product of the factor projections of every position but `t`.
    fn others_product(projected: &[Array2<f32>; 3], t: usize) -> Array2<f32> {
        let [o1, o2] = others(t);
        &projected[o1] * &projected[o2]
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let projected = self.projected(vmap, w)?;
        let mut term = None;

        for t in 0..3 {
            let b = &self.units[t];
            if b.unit != unit {
                continue;
            }

            let p = w.tensor(self.projections[t])?;
            let factors = p.shape().last().copied().unwrap_or(0);
            let p = p.to_shape((b.size(), factors))?;

            let rest = Self::others_product(&projected, t);
            let contribution = rest.dot(&p.t()).into_dyn();
            term = Some(accumulate(term, reshape(contribution, b.batched(rest.nrows()))?));
        }

        term.ok_or_else(|| unbound(unit))
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let [a, b, c] = self.projected(vmap, w)?;
        Ok(-(a * b * c).sum_axis(Axis(1)))
    }

    fn positions(&self, var: TensorId) -> Result<Vec<usize>> {
        let positions = (0..3)
            .filter(|&t| self.projections[t] == var)
            .collect::<Vec<_>>();

        if positions.is_empty() {
            return Err(unowned(var));
        }

        Ok(positions)
    }

    pub(crate) fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let positions = self.positions(var)?;
        let projected = self.projected(vmap, w)?;
        let mut grad = None;

        for t in positions {
            let b = &self.units[t];
            let rest = Self::others_product(&projected, t);
            let outer = outer_rows(b.flat(vmap)?.view(), rest.view())?;

            let shape = vec![outer.nrows(), b.size(), rest.ncols()];
            grad = Some(accumulate(grad, reshape(outer.into_dyn(), shape)?));
        }

        grad.ok_or_else(|| unowned(var))
    }

    pub(crate) fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let positions = self.positions(var)?;
        let projected = self.projected(vmap, w)?;
        let mut grad = None;

        for t in positions {
            let rest = Self::others_product(&projected, t);
            let g = self.units[t].flat(vmap)?.t().dot(&rest).into_dyn();
            grad = Some(accumulate(grad, g));
        }

        grad.ok_or_else(|| unowned(var))
    }
}
