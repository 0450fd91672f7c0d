use crate::{
    RbmErr, Result,
    tensor::Tensor,
};

/// Accumulators of the stateful updaters, one slot per `Momentum` node.
#[derive(Debug, Clone, Default)]
pub struct UpdaterState {
    slots: Vec<Tensor>,
}

/// A new accumulator value, applied once the whole step has been evaluated.
#[derive(Debug, Clone)]
pub struct StateWrite {
    pub slot: usize,
    pub value: Tensor,
}

impl UpdaterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a zeroed slot of the given shape.
    pub fn allocate(&mut self, shape: &[usize]) -> usize {
        self.slots.push(Tensor::zeros(shape));
        self.slots.len() - 1
    }

    pub fn slot(&self, slot: usize) -> Result<&Tensor> {
        self.slots
            .get(slot)
            .ok_or_else(|| RbmErr::StructuralMismatch(format!("no updater state slot #{slot}")))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn apply(&mut self, write: StateWrite) -> Result<()> {
        let StateWrite { slot, value } = write;
        let current = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| RbmErr::StructuralMismatch(format!("no updater state slot #{slot}")))?;

        if current.shape() != value.shape() {
            return Err(RbmErr::shape(
                format!("updater state slot #{slot}"),
                value.shape(),
                current.shape(),
            ));
        }

        *current = value;
        Ok(())
    }
}
