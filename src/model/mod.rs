mod builder;
mod init;
pub mod presets;
mod spec;

pub use builder::ModelBuilder;
pub use init::initialize;
pub use spec::{InitSpec, ModelSpec, ParamSpec, TensorSpec, UnitKindSpec, UnitSpec};

use std::collections::BTreeSet;

use ndarray::Array1;

use crate::{
    RbmErr, Result,
    params::ParamSet,
    sampling::NoiseSource,
    tensor::{Tensor, TensorId, Weights},
    units::{Activation, Capability, UnitGroup, UnitId, VarMap},
};

/// An energy based model: its unit groups, the parameter sets connecting them and the weight
/// tensors those sets read.
///
/// Every aggregate query (activations, energies, gradients, free energies, sampling) goes
/// through the model, unit groups and parameter sets only know about themselves.
#[derive(Debug, Clone)]
pub struct Model {
    units: Vec<UnitGroup>,
    params: Vec<ParamSet>,
    weights: Weights,
}

impl Model {
    pub(crate) fn new(units: Vec<UnitGroup>, params: Vec<ParamSet>, weights: Weights) -> Self {
        Self {
            units,
            params,
            weights,
        }
    }

    pub fn units(&self) -> &[UnitGroup] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Result<&UnitGroup> {
        self.units
            .get(id.index())
            .ok_or_else(|| RbmErr::UnknownUnit(format!("#{}", id.index())))
    }

    /// Looks a unit group up by name.
    pub fn unit_id(&self, name: &str) -> Result<UnitId> {
        self.units
            .iter()
            .find(|u| u.name() == name)
            .map(UnitGroup::id)
            .ok_or_else(|| RbmErr::UnknownUnit(name.to_string()))
    }

    pub fn params(&self) -> &[ParamSet] {
        &self.params
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// # Errors
    /// `UnknownTensor` for a handle of another model.
    pub fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.weights.get(id)
    }

    pub fn tensor_id(&self, name: &str) -> Result<TensorId> {
        self.weights
            .id(name)
            .ok_or_else(|| RbmErr::UnknownTensor(name.to_string()))
    }

    /// Replaces a weight tensor, keeping its shape.
    pub fn set_tensor(&mut self, id: TensorId, value: Tensor) -> Result<()> {
        self.weights.set(id, value)
    }

    /// Every weight tensor used by some parameter set, once, in order of first use. Tied
    /// tensors appear a single time.
    pub fn variables(&self) -> Vec<TensorId> {
        let mut vars = Vec::new();
        for var in self.params.iter().flat_map(ParamSet::variables) {
            if !vars.contains(&var) {
                vars.push(var);
            }
        }
        vars
    }

    /// Fails with `UnsupportedOperation` if any of the groups lacks `capability`. Proxies are
    /// skipped: they are derived from their primaries, which are checked instead.
    pub fn check_capability(&self, units: &[UnitId], capability: Capability) -> Result<()> {
        for &id in units {
            let group = self.unit(id)?;
            match group.primary() {
                Some(primary) => self.unit(primary)?.check(capability)?,
                None => group.check(capability)?,
            }
        }

        Ok(())
    }

    /// The sum of every parameter set's contribution to the activation of `unit`.
    pub fn activation(&self, unit: UnitId, vmap: &VarMap) -> Result<Tensor> {
        let group = self.unit(unit)?;

        let mut total: Option<Tensor> = None;
        for set in self.params.iter().filter(|set| set.affects(unit)) {
            let term = set.activation_term(unit, vmap, &self.weights)?;
            total = Some(match total {
                Some(total) => total + term,
                None => term,
            });
        }

        Ok(total.unwrap_or_else(|| {
            let mut shape = vec![vmap.batch_size().unwrap_or(1)];
            shape.extend_from_slice(group.shape());
            Tensor::zeros(shape)
        }))
    }

    /// The activations of the given groups, completed with their proxies and primaries.
    pub fn activations(&self, units: &[UnitId], vmap: &VarMap) -> Result<VarMap> {
        self.complete_units(units)?
            .into_iter()
            .try_fold(VarMap::new(), |acts, id| {
                Ok(acts.with(id, self.activation(id, vmap)?))
            })
    }

    /// Gathers the activation of a primary group and, when its kind needs one, of its proxy.
    fn activation_of(&self, group: &UnitGroup, acts: &VarMap) -> Result<Activation> {
        let primary = acts.require(group.id())?.clone();
        let proxy = match (group.kind().required_proxy(), group.proxies().first()) {
            (Some(_), Some(&proxy)) => Some(acts.require(proxy)?.clone()),
            (Some(_), None) => {
                return Err(RbmErr::StructuralMismatch(format!(
                    "unit group '{}' has no proxy group",
                    group.name()
                )));
            }
            _ => None,
        };

        Ok(Activation { primary, proxy })
    }

    /// The activation of a group (and its proxy's) straight from a variable map.
    pub fn unit_activation(&self, unit: UnitId, vmap: &VarMap) -> Result<Activation> {
        let acts = self.activations(&[unit], vmap)?;
        self.activation_of(self.unit(unit)?, &acts)
    }

    /// Total energy, one value per example.
    pub fn energy(&self, vmap: &VarMap) -> Result<Array1<f32>> {
        let mut total = Array1::zeros(vmap.batch_size().unwrap_or(1));
        for set in &self.params {
            total = total + set.energy_term(vmap, &self.weights)?;
        }
        Ok(total)
    }

    fn sum_over_owners<F>(&self, var: TensorId, f: F) -> Result<Tensor>
    where
        F: Fn(&ParamSet) -> Result<Tensor>,
    {
        let mut total: Option<Tensor> = None;
        for set in self.params.iter().filter(|set| set.owns(var)) {
            let grad = f(set)?;
            total = Some(match total {
                Some(total) => total + grad,
                None => grad,
            });
        }

        match total {
            Some(total) => Ok(total),
            None => Err(RbmErr::UnknownTensor(self.weights.name(var)?.to_string())),
        }
    }

    /// Per example gradient of the negative energy with respect to `var`, accumulated over
    /// every parameter set using it.
    pub fn energy_gradient(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        self.sum_over_owners(var, |set| set.energy_gradient(var, vmap, &self.weights))
    }

    /// Gradient of the negative energy with respect to `var`, summed over the minibatch.
    pub fn energy_gradient_sum(&self, var: TensorId, vmap: &VarMap) -> Result<Tensor> {
        self.sum_over_owners(var, |set| set.energy_gradient_sum(var, vmap, &self.weights))
    }

    /// The groups sharing a parameter set with any of `given`, `given` excluded.
    ///
    /// This is one hop of reachability, nothing checks that the resulting partition is
    /// bipartite. Callers sampling or integrating over the result must make sure the groups
    /// are conditionally independent given `given`.
    pub fn dependent_units(&self, given: &[UnitId]) -> Vec<UnitId> {
        let mut dependent = BTreeSet::new();
        for set in &self.params {
            let units = set.units();
            if units.iter().any(|u| given.contains(u)) {
                dependent.extend(units);
            }
        }

        dependent
            .into_iter()
            .filter(|u| !given.contains(u))
            .collect()
    }

    /// Expands a list of groups with the proxies of its primaries and the primaries of its
    /// proxies, sorted by id.
    pub fn complete_units(&self, units: &[UnitId]) -> Result<Vec<UnitId>> {
        let mut complete = BTreeSet::new();
        for &id in units {
            let primary = self.unit(id)?.primary().unwrap_or(id);
            complete.insert(primary);
            complete.extend(self.unit(primary)?.proxies().iter().copied());
        }

        Ok(complete.into_iter().collect())
    }

    /// Adds the missing proxy values derived from the primaries present in `vmap`.
    ///
    /// Existing entries are kept as they are, so completing twice changes nothing.
    pub fn complete_vmap(&self, vmap: &VarMap) -> Result<VarMap> {
        let mut complete = vmap.clone();
        for (id, value) in vmap.iter() {
            for &proxy in self.unit(id)?.proxies() {
                if !complete.contains(proxy) {
                    let derived = self.unit(proxy)?.derive(value)?;
                    complete = complete.with(proxy, derived);
                }
            }
        }

        Ok(complete)
    }

    fn primaries(&self, units: &[UnitId]) -> Result<Vec<&UnitGroup>> {
        let mut primaries = Vec::new();
        for id in self.complete_units(units)? {
            let group = self.unit(id)?;
            if group.primary().is_none() {
                primaries.push(group);
            }
        }
        Ok(primaries)
    }

    /// Applies `f` to every primary group once, in id order, and derives the proxies of each
    /// result.
    fn dispatch<F>(&self, units: &[UnitId], capability: Capability, mut f: F) -> Result<VarMap>
    where
        F: FnMut(&UnitGroup) -> Result<Tensor>,
    {
        let primaries = self.primaries(units)?;
        for group in &primaries {
            group.check(capability)?;
        }

        let mut out = VarMap::new();
        for group in primaries {
            let value = f(group)?;
            for &proxy in group.proxies() {
                out = out.with(proxy, self.unit(proxy)?.derive(&value)?);
            }
            out = out.with(group.id(), value);
        }

        Ok(out)
    }

    /// Samples the given groups out of precomputed activations.
    ///
    /// Primaries are sampled once each and proxies are derived from the samples, so a proxy is
    /// always consistent with its primary.
    pub fn sample_from_activations(
        &self,
        units: &[UnitId],
        acts: &VarMap,
        noise: &mut dyn NoiseSource,
    ) -> Result<VarMap> {
        self.dispatch(units, Capability::Sample, |group| {
            group.sample(&self.activation_of(group, acts)?, noise)
        })
    }

    pub fn sample(
        &self,
        units: &[UnitId],
        vmap: &VarMap,
        noise: &mut dyn NoiseSource,
    ) -> Result<VarMap> {
        self.check_capability(units, Capability::Sample)?;
        let acts = self.activations(units, vmap)?;
        self.sample_from_activations(units, &acts, noise)
    }

    /// Mean field values of the given groups out of precomputed activations, proxies are
    /// derived from their primaries' means.
    pub fn mean_field_from_activations(&self, units: &[UnitId], acts: &VarMap) -> Result<VarMap> {
        self.dispatch(units, Capability::MeanField, |group| {
            group.mean_field(&self.activation_of(group, acts)?)
        })
    }

    pub fn mean_field(&self, units: &[UnitId], vmap: &VarMap) -> Result<VarMap> {
        self.check_capability(units, Capability::MeanField)?;
        let acts = self.activations(units, vmap)?;
        self.mean_field_from_activations(units, &acts)
    }

    pub fn free_energy_term_from_activations(
        &self,
        unit: UnitId,
        acts: &VarMap,
    ) -> Result<Array1<f32>> {
        let group = self.unit(unit)?;
        group.check(Capability::FreeEnergy)?;
        group.free_energy_term(&self.activation_of(group, acts)?)
    }

    /// The closed form contribution of `unit` to the free energy once it is summed out.
    pub fn free_energy_term(&self, unit: UnitId, vmap: &VarMap) -> Result<Array1<f32>> {
        self.check_capability(&[unit], Capability::FreeEnergy)?;
        let acts = self.activations(&[unit], vmap)?;
        self.free_energy_term_from_activations(unit, &acts)
    }

    /// The energy with the `integrated` groups summed out, one value per example.
    ///
    /// Parameter sets not touching the integrated groups contribute their energy, each
    /// integrated group its free energy term. Only valid if the integrated groups are
    /// conditionally independent given the rest of `vmap`.
    pub fn free_energy(&self, integrated: &[UnitId], vmap: &VarMap) -> Result<Array1<f32>> {
        let integrated = self.complete_units(integrated)?;
        self.check_capability(&integrated, Capability::FreeEnergy)?;

        let mut total = Array1::zeros(vmap.batch_size().unwrap_or(1));
        for set in &self.params {
            if !set.units().iter().any(|u| integrated.contains(u)) {
                total = total + set.energy_term(vmap, &self.weights)?;
            }
        }

        let acts = self.activations(&integrated, vmap)?;
        for group in self.primaries(&integrated)? {
            total = total + group.free_energy_term(&self.activation_of(group, &acts)?)?;
        }

        Ok(total)
    }

    /// Log density of `value` for `unit` given the rest of `vmap`, one value per example.
    pub fn log_prob(&self, unit: UnitId, value: &Tensor, vmap: &VarMap) -> Result<Array1<f32>> {
        let group = self.unit(unit)?;
        group.check(Capability::LogProb)?;
        group.log_prob(value, &self.unit_activation(unit, vmap)?)
    }
}
