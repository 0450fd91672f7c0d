use ndarray::{Array1, Axis, Ix4, s, stack};

use super::{Binding, accumulate, arity, expect_shape, unbound, unowned};
use crate::{
    RbmErr, Result,
    tensor::{
        Tensor, TensorId, TensorLookup, Weights, conv2d_full, conv2d_valid, conv2d_weight_gradient,
        sum_except_batch,
    },
    units::{UnitId, VarMap},
};

/// Convolutional term between a `[maps, height, width]` visible group and a hidden group of
/// feature maps.
///
/// The hidden activation is the valid convolution of the visible value with the filters, the
/// visible activation the full convolution of the hidden value with the spatially flipped,
/// channel transposed filters.
#[derive(Debug, Clone)]
pub struct Conv2d {
    visible: Binding,
    hidden: Binding,
    w: TensorId,
}

impl Conv2d {
    pub fn new(units: Vec<Binding>, tensors: Vec<TensorId>) -> Result<Self> {
        let [visible, hidden] = arity("a convolution", "unit groups", units)?;
        let [w] = arity("a convolution", "tensor", tensors)?;

        for b in [&visible, &hidden] {
            if b.shape.len() != 3 {
                return Err(RbmErr::StructuralMismatch(format!(
                    "a convolution binds [maps, height, width] groups, got {:?}",
                    b.shape
                )));
            }
        }

        Ok(Self { visible, hidden, w })
    }

    pub fn units(&self) -> Vec<UnitId> {
        vec![self.visible.unit, self.hidden.unit]
    }

    pub fn variable(&self) -> TensorId {
        self.w
    }

    /// `[out_maps, in_maps, filter_height, filter_width]`.
    fn filter_shape(&self) -> Vec<usize> {
        let (v, h) = (&self.visible.shape, &self.hidden.shape);
        vec![
            h[0],
            v[0],
            (v[1] + 1).saturating_sub(h[1]),
            (v[2] + 1).saturating_sub(h[2]),
        ]
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        let (v, h) = (&self.visible.shape, &self.hidden.shape);
        if h[1] > v[1] || h[2] > v[2] {
            return Err(RbmErr::shape("convolution feature maps", h, v));
        }

        expect_shape(
            weights.name(self.w)?,
            weights.get(self.w)?.shape(),
            &self.filter_shape(),
        )
    }

    fn backward_filters(w: &Tensor) -> Result<Tensor> {
        let w = w.view().into_dimensionality::<Ix4>()?;
        let flipped = w
            .permuted_axes([1, 0, 2, 3])
            .slice_move(s![.., .., ..;-1, ..;-1]);
        Ok(flipped.to_owned().into_dyn())
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        let filters = w.tensor(self.w)?;
        let mut term = None;

        if unit == self.hidden.unit {
            let v = self.visible.value(vmap)?;
            term = Some(accumulate(term, conv2d_valid(v, filters)?));
        }

        if unit == self.visible.unit {
            let h = self.hidden.value(vmap)?;
            let t = conv2d_full(h, &Self::backward_filters(filters)?)?;
            term = Some(accumulate(term, t));
        }

        term.ok_or_else(|| unbound(unit))
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let v = self.visible.value(vmap)?;
        let h = self.hidden.value(vmap)?;
        let term = conv2d_valid(v, w.tensor(self.w)?)?;

        Ok(-sum_except_batch(&(term * h))?)
    }

    pub(crate) fn energy_gradient(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        if var != self.w {
            return Err(unowned(var));
        }

        let v = self.visible.value(vmap)?;
        let h = self.hidden.value(vmap)?;

        let per_example = (0..v.len_of(Axis(0)))
            .map(|i| {
                let vi = v.slice_axis(Axis(0), (i..=i).into()).to_owned();
                let hi = h.slice_axis(Axis(0), (i..=i).into()).to_owned();
                conv2d_weight_gradient(&vi, &hi)
            })
            .collect::<Result<Vec<_>>>()?;

        let views = per_example.iter().map(|g| g.view()).collect::<Vec<_>>();
        Ok(stack(Axis(0), &views)?)
    }

    pub(crate) fn energy_gradient_sum(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        if var != self.w {
            return Err(unowned(var));
        }

        conv2d_weight_gradient(self.visible.value(vmap)?, self.hidden.value(vmap)?)
    }
}
