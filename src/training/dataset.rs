use ndarray::Axis;
use rand::{Rng, seq::SliceRandom};

use crate::{
    RbmErr, Result,
    units::{UnitId, VarMap},
};

/// An in memory dataset: one tensor per clamped unit group, examples along axis 0.
#[derive(Debug, Clone)]
pub struct Dataset {
    data: VarMap,
    len: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Errors
    /// `ShapeMismatch` if the groups hold different amounts of examples.
    pub fn new(data: VarMap) -> Result<Self> {
        let len = data.batch_size().unwrap_or(0);
        for (unit, value) in data.iter() {
            let n = value.shape().first().copied().unwrap_or(0);
            if n != len {
                return Err(RbmErr::shape(
                    format!("examples of unit group #{}", unit.index()),
                    &[n],
                    &[len],
                ));
            }
        }

        Ok(Self { data, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn units(&self) -> Vec<UnitId> {
        self.data.units()
    }

    pub fn data(&self) -> &VarMap {
        &self.data
    }

    /// Reorders the examples by a random permutation, the same one for every group.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order = (0..self.len).collect::<Vec<_>>();
        order.shuffle(rng);

        self.data = VarMap::from_pairs(
            self.data
                .iter()
                .map(|(unit, value)| (unit, value.select(Axis(0), &order))),
        );
    }

    /// Consecutive minibatches of `size` examples, the last one may be smaller.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = VarMap> + '_ {
        let size = size.max(1);
        (0..self.len).step_by(size).map(move |start| {
            let end = (start + size).min(self.len);
            VarMap::from_pairs(self.data.iter().map(|(unit, value)| {
                (unit, value.slice_axis(Axis(0), (start..end).into()).to_owned())
            }))
        })
    }
}
