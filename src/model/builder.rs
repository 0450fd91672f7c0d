use log::debug;
use rand::Rng;

use super::{Model, ModelSpec, ParamSpec, initialize, spec::proxy_for};
use crate::{
    RbmErr, Result,
    params::{
        Bias, Binding, Conv2d, Factor, FactoredThirdOrder, ParamSet, Product, SharedBias,
        ThirdOrder, Transformed,
    },
    tensor::{TensorId, Weights},
    units::{UnitGroup, UnitId, UnitKind},
};

/// Builds `Model`s given a specification.
///
/// Building happens in two phases: every unit group, proxy and tensor is registered first, then
/// the parameter sets are resolved against them and validated. Any structural problem surfaces
/// here, before the model can be sampled from.
#[derive(Default)]
pub struct ModelBuilder;

impl ModelBuilder {
    /// Creates a new `ModelBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Model` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the model.
    /// * `rng` - The source of randomness for the random tensor initializations.
    pub fn build<R>(&self, spec: &ModelSpec, rng: &mut R) -> Result<Model>
    where
        R: Rng + ?Sized,
    {
        let mut units = Vec::new();
        for unit in &spec.units {
            self.register_unit(&mut units, &unit.name, unit.shape.clone(), unit.kind.into())?;
        }

        let mut weights = Weights::new();
        for tensor in &spec.tensors {
            let value = initialize(&tensor.init, &tensor.shape, rng)?;
            weights.push(&tensor.name, value)?;
        }

        let params = spec
            .params
            .iter()
            .map(|p| self.resolve_param(p, &mut units, &weights))
            .collect::<Result<Vec<_>>>()?;

        for set in &params {
            set.validate(&weights)?;
        }

        debug!(
            units = units.len(),
            tensors = weights.len(),
            params = params.len();
            "built model"
        );

        Ok(Model::new(units, params, weights))
    }

    /// Registers a unit group along with the proxy group its kind needs.
    fn register_unit(
        &self,
        units: &mut Vec<UnitGroup>,
        name: &str,
        shape: Vec<usize>,
        kind: UnitKind,
    ) -> Result<UnitId> {
        let id = self.push_unit(units, name, shape.clone(), kind)?;

        if let Some((f, proxy_name)) = proxy_for(kind, name) {
            let proxy = self.push_unit(units, &proxy_name, shape, UnitKind::Proxy(f))?;
            units[proxy.index()].primary = Some(id);
            units[id.index()].proxies.push(proxy);
        }

        Ok(id)
    }

    fn push_unit(
        &self,
        units: &mut Vec<UnitGroup>,
        name: &str,
        shape: Vec<usize>,
        kind: UnitKind,
    ) -> Result<UnitId> {
        if units.iter().any(|u| u.name() == name) {
            return Err(RbmErr::StructuralMismatch(format!(
                "unit group '{name}' is declared twice"
            )));
        }

        let id = UnitId(units.len());
        units.push(UnitGroup::new(id, name, shape, kind));
        Ok(id)
    }

    fn resolve_bindings(&self, names: &[String], units: &[UnitGroup]) -> Result<Vec<Binding>> {
        names
            .iter()
            .map(|name| {
                units
                    .iter()
                    .find(|u| u.name() == name)
                    .map(|u| Binding::new(u.id(), u.shape().to_vec()))
                    .ok_or_else(|| RbmErr::UnknownUnit(name.clone()))
            })
            .collect()
    }

    fn resolve_tensor(&self, name: &str, weights: &Weights) -> Result<TensorId> {
        weights
            .id(name)
            .ok_or_else(|| RbmErr::UnknownTensor(name.to_string()))
    }

    fn resolve_tensors(&self, names: &[String], weights: &Weights) -> Result<Vec<TensorId>> {
        names
            .iter()
            .map(|name| self.resolve_tensor(name, weights))
            .collect()
    }

    fn resolve_links(
        &self,
        units: &[String],
        tensors: &[String],
        groups: &[UnitGroup],
        weights: &Weights,
    ) -> Result<(Vec<Binding>, Vec<TensorId>)> {
        Ok((
            self.resolve_bindings(units, groups)?,
            self.resolve_tensors(tensors, weights)?,
        ))
    }

    fn resolve_param(
        &self,
        spec: &ParamSpec,
        units: &mut Vec<UnitGroup>,
        weights: &Weights,
    ) -> Result<ParamSet> {
        let set = match spec {
            ParamSpec::Bias { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::Bias(Bias::new(u, t)?)
            }
            ParamSpec::SharedBias {
                units: u,
                tensors,
                shared_axes,
            } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::SharedBias(SharedBias::new(u, t, *shared_axes)?)
            }
            ParamSpec::Prod { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::Prod(Product::new(u, t)?)
            }
            ParamSpec::AdvancedProd { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::AdvancedProd(Product::new(u, t)?)
            }
            ParamSpec::Conv2d { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::Conv2d(Conv2d::new(u, t)?)
            }
            ParamSpec::ThirdOrder { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::ThirdOrder(ThirdOrder::new(u, t)?)
            }
            ParamSpec::ThirdOrderFactored { units: u, tensors } => {
                let (u, t) = self.resolve_links(u, tensors, units, weights)?;
                ParamSet::ThirdOrderFactored(FactoredThirdOrder::new(u, t)?)
            }
            ParamSpec::Transformed {
                transform,
                raw,
                inner,
            } => {
                let inner = self.resolve_param(inner, units, weights)?;
                let raw = self.resolve_tensor(raw, weights)?;
                ParamSet::Transformed(Transformed::new(inner, raw, *transform)?)
            }
            ParamSpec::Factor { name, size, params } => {
                let id = self.register_unit(units, name, vec![*size], UnitKind::Bare)?;
                let mut factor = Factor::new(name, Binding::new(id, vec![*size]));
                for p in params {
                    factor.add(self.resolve_param(p, units, weights)?)?;
                }

                factor.finalize()?;
                ParamSet::Factor(factor)
            }
        };

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::model::{InitSpec, TensorSpec, UnitKindSpec, UnitSpec, presets};

    fn build(spec: &ModelSpec) -> Result<Model> {
        ModelBuilder::new().build(spec, &mut StdRng::seed_from_u64(0))
    }

    fn two_groups(params: Vec<ParamSpec>, tensors: Vec<TensorSpec>) -> ModelSpec {
        ModelSpec {
            units: vec![
                UnitSpec::new("v", vec![4], UnitKindSpec::Binary),
                UnitSpec::new("h", vec![3], UnitKindSpec::Binary),
            ],
            tensors,
            params,
        }
    }

    #[test]
    fn proxies_are_registered_next_to_their_primary() {
        let model = build(&presets::learnt_precision(4, 2)).unwrap();

        let v = model.unit_id("v").unwrap();
        let proxy = model.unit_id("v_precision").unwrap();
        assert_eq!(model.unit(v).unwrap().proxies(), &[proxy]);
        assert_eq!(model.unit(proxy).unwrap().primary(), Some(v));
        assert_eq!(model.unit(proxy).unwrap().shape(), &[4]);
    }

    #[test]
    fn factors_register_their_group() {
        let model = build(&presets::factored_third_order(3, 2, 2, 5)).unwrap();

        let f = model.unit_id("f").unwrap();
        assert_eq!(model.unit(f).unwrap().kind(), UnitKind::Bare);
        assert_eq!(model.unit(f).unwrap().shape(), &[5]);
    }

    #[test]
    fn wrong_weight_shapes_are_rejected() {
        let spec = two_groups(
            vec![ParamSpec::prod("v", "h", "w")],
            vec![TensorSpec::new("w", vec![3, 4], InitSpec::zeros())],
        );

        assert!(matches!(build(&spec), Err(RbmErr::ShapeMismatch { .. })));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let spec = two_groups(
            vec![ParamSpec::prod("v", "x", "w")],
            vec![TensorSpec::new("w", vec![4, 3], InitSpec::zeros())],
        );
        assert!(matches!(build(&spec), Err(RbmErr::UnknownUnit(name)) if name == "x"));

        let spec = two_groups(vec![ParamSpec::bias("v", "bv")], vec![]);
        assert!(matches!(build(&spec), Err(RbmErr::UnknownTensor(name)) if name == "bv"));
    }

    #[test]
    fn arity_is_checked() {
        let spec = two_groups(
            vec![ParamSpec::Prod {
                units: vec!["v".into()],
                tensors: vec!["w".into()],
            }],
            vec![TensorSpec::new("w", vec![4, 3], InitSpec::zeros())],
        );

        assert!(matches!(build(&spec), Err(RbmErr::StructuralMismatch(_))));
    }

    #[test]
    fn duplicate_groups_are_rejected() {
        let mut spec = two_groups(vec![], vec![]);
        spec.units.push(UnitSpec::new("v", vec![2], UnitKindSpec::Gaussian));

        assert!(matches!(build(&spec), Err(RbmErr::StructuralMismatch(_))));
    }

    #[test]
    fn tied_tensors_are_shared() {
        let spec = ModelSpec {
            units: vec![
                UnitSpec::new("a", vec![3], UnitKindSpec::Binary),
                UnitSpec::new("b", vec![3], UnitKindSpec::Binary),
            ],
            tensors: vec![TensorSpec::new("bias", vec![3], InitSpec::zeros())],
            params: vec![ParamSpec::bias("a", "bias"), ParamSpec::bias("b", "bias")],
        };

        let model = build(&spec).unwrap();
        assert_eq!(model.variables().len(), 1);
    }
}
