use super::UnitId;
use crate::{RbmErr, Result, tensor::Tensor};

/// The values of a set of unit groups, indexed by `UnitId`.
///
/// A map is never modified in place once shared: every operation producing new entries consumes
/// or clones the map and returns a new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarMap {
    slots: Vec<Option<Tensor>>,
}

impl VarMap {
    /// Creates an empty `VarMap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map out of `(unit, value)` pairs, later pairs win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (UnitId, Tensor)>) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |map, (id, value)| map.with(id, value))
    }

    /// Returns the map with `unit` bound to `value`.
    pub fn with(mut self, unit: UnitId, value: Tensor) -> Self {
        let i = unit.index();
        if self.slots.len() <= i {
            self.slots.resize(i + 1, None);
        }

        self.slots[i] = Some(value);
        self
    }

    /// Returns the union of both maps, entries of `other` win.
    pub fn merged(self, other: &VarMap) -> Self {
        other
            .iter()
            .fold(self, |map, (id, value)| map.with(id, value.clone()))
    }

    /// Returns a copy of the map holding only the given units.
    pub fn restricted(&self, units: &[UnitId]) -> Self {
        self.iter()
            .filter(|(id, _)| units.contains(id))
            .fold(Self::new(), |map, (id, value)| map.with(id, value.clone()))
    }

    pub fn get(&self, unit: UnitId) -> Option<&Tensor> {
        self.slots.get(unit.index()).and_then(Option::as_ref)
    }

    /// Like `get`, but a missing value is an error.
    pub fn require(&self, unit: UnitId) -> Result<&Tensor> {
        self.get(unit).ok_or(RbmErr::MissingValue { unit })
    }

    pub fn contains(&self, unit: UnitId) -> bool {
        self.get(unit).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &Tensor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (UnitId(i), t)))
    }

    pub fn units(&self) -> Vec<UnitId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The minibatch size, read off the first value's leading axis.
    pub fn batch_size(&self) -> Option<usize> {
        self.iter().find_map(|(_, t)| t.shape().first().copied())
    }

    /// The minibatch size shared by every value.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first group whose leading axis disagrees with the first value.
    pub fn uniform_batch_size(&self) -> Result<Option<usize>> {
        let batch = self.batch_size();
        for (unit, value) in self.iter() {
            let n = value.shape().first().copied();
            if n != batch {
                return Err(RbmErr::shape(
                    format!("batch of unit group #{}", unit.index()),
                    &[n.unwrap_or(0)],
                    &[batch.unwrap_or(0)],
                ));
            }
        }

        Ok(batch)
    }
}
