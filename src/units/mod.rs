mod group;
mod kind;
mod varmap;

pub use group::{Activation, UnitGroup};
pub use kind::{Capability, ProxyFn, UnitKind};
pub use varmap::VarMap;

/// Stable index of a unit group inside its model, assigned at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) usize);

impl UnitId {
    pub fn index(self) -> usize {
        self.0
    }
}
