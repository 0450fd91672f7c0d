use ndarray::Array1;

use super::{Binding, ParamSet, accumulate, unbound, unowned};
use crate::{
    RbmErr, Result,
    tensor::{Tensor, TensorId, TensorLookup, Weights, sum_except_batch},
    units::{UnitId, VarMap},
};

/// Multiplicative composition of parameter sets through a synthetic factor group.
///
/// Every sub set binds the factor group. The factor side terms of all sub sets are multiplied
/// elementwise: the energy is `-Σ_f Π_s term_s[f]`, and a sub set's activation toward its other
/// groups is computed with the product of the *other* sub sets' terms standing in for the factor
/// group's value.
///
/// A factor is assembled with `add` and sealed with `finalize`, queries before that fail with
/// `NotInitialized`.
#[derive(Debug, Clone)]
pub struct Factor {
    name: String,
    unit: Binding,
    sets: Vec<ParamSet>,
    finalized: bool,
}

impl Factor {
    pub fn new(name: &str, unit: Binding) -> Self {
        Self {
            name: name.to_string(),
            unit,
            sets: Vec::new(),
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The synthetic group standing for the factor space.
    pub fn unit(&self) -> UnitId {
        self.unit.unit
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Registers a sub parameter set.
    ///
    /// # Errors
    /// `StructuralMismatch` if the factor was already finalized or the set doesn't bind the
    /// factor's group.
    pub fn add(&mut self, set: ParamSet) -> Result<()> {
        if self.finalized {
            return Err(RbmErr::StructuralMismatch(format!(
                "factor '{}' is finalized, no more parameter sets can be added",
                self.name
            )));
        }

        if !set.affects(self.unit.unit) {
            return Err(RbmErr::StructuralMismatch(format!(
                "a parameter set added to factor '{}' doesn't bind its unit group",
                self.name
            )));
        }

        self.sets.push(set);
        Ok(())
    }

    /// Freezes the factor's sub sets.
    pub fn finalize(&mut self) -> Result<()> {
        if self.sets.len() < 2 {
            return Err(RbmErr::StructuralMismatch(format!(
                "factor '{}' needs at least two parameter sets, got {}",
                self.name,
                self.sets.len()
            )));
        }

        self.finalized = true;
        Ok(())
    }

    fn ensure_finalized(&self) -> Result<()> {
        if self.finalized {
            Ok(())
        } else {
            Err(RbmErr::NotInitialized {
                factor: self.name.clone(),
            })
        }
    }

    /// The groups bound by the sub sets, the factor group excluded.
    pub fn units(&self) -> Vec<UnitId> {
        let mut units = Vec::new();
        for unit in self.sets.iter().flat_map(ParamSet::units) {
            if unit != self.unit.unit && !units.contains(&unit) {
                units.push(unit);
            }
        }
        units
    }

    pub fn variables(&self) -> Vec<TensorId> {
        let mut vars = Vec::new();
        for var in self.sets.iter().flat_map(ParamSet::variables) {
            if !vars.contains(&var) {
                vars.push(var);
            }
        }
        vars
    }

    pub(crate) fn validate(&self, weights: &Weights) -> Result<()> {
        self.ensure_finalized()?;
        self.sets.iter().try_for_each(|set| set.validate(weights))
    }

    /// Elementwise product of the factor side terms of every sub set but `excluded`.
    pub fn factor_product(
        &self,
        excluded: Option<usize>,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        self.ensure_finalized()?;

        let mut product: Option<Tensor> = None;
        for (i, set) in self.sets.iter().enumerate() {
            if Some(i) == excluded {
                continue;
            }

            let term = set.activation_term(self.unit.unit, vmap, w)?;
            product = Some(match product {
                Some(p) => p * term,
                None => term,
            });
        }

        product.ok_or_else(|| {
            RbmErr::StructuralMismatch(format!("factor '{}' has no parameter sets", self.name))
        })
    }

    /// `vmap` with the factor group bound to the product of every sub set but `i`.
    fn stand_in(&self, i: usize, vmap: &VarMap, w: &dyn TensorLookup) -> Result<VarMap> {
        let product = self.factor_product(Some(i), vmap, w)?;
        Ok(vmap.clone().with(self.unit.unit, product))
    }

    pub(crate) fn activation_term(
        &self,
        unit: UnitId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        self.ensure_finalized()?;
        if unit == self.unit.unit {
            return Err(unbound(unit));
        }

        let mut term = None;
        for (i, set) in self.sets.iter().enumerate() {
            if set.affects(unit) {
                let stand_in = self.stand_in(i, vmap, w)?;
                term = Some(accumulate(term, set.activation_term(unit, &stand_in, w)?));
            }
        }

        term.ok_or_else(|| unbound(unit))
    }

    pub(crate) fn energy_term(&self, vmap: &VarMap, w: &dyn TensorLookup) -> Result<Array1<f32>> {
        let product = self.factor_product(None, vmap, w)?;
        Ok(-sum_except_batch(&product)?)
    }

    pub(crate) fn energy_gradient(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        self.ensure_finalized()?;

        let mut grad = None;
        for (i, set) in self.sets.iter().enumerate() {
            if set.owns(var) {
                let stand_in = self.stand_in(i, vmap, w)?;
                grad = Some(accumulate(grad, set.energy_gradient(var, &stand_in, w)?));
            }
        }

        grad.ok_or_else(|| unowned(var))
    }

    pub(crate) fn energy_gradient_sum(
        &self,
        var: TensorId,
        vmap: &VarMap,
        w: &dyn TensorLookup,
    ) -> Result<Tensor> {
        self.ensure_finalized()?;

        let mut grad = None;
        for (i, set) in self.sets.iter().enumerate() {
            if set.owns(var) {
                let stand_in = self.stand_in(i, vmap, w)?;
                grad = Some(accumulate(grad, set.energy_gradient_sum(var, &stand_in, w)?));
            }
        }

        grad.ok_or_else(|| unowned(var))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, Axis, IxDyn};
    use ndarray_rand::RandomExt;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::StandardNormal;

    use super::*;
    use crate::params::{FactoredThirdOrder, Product};

    fn random(shape: &[usize], rng: &mut StdRng) -> Tensor {
        ArrayD::random_using(IxDyn(shape), StandardNormal, rng)
    }

    /// A factor over three vector groups, equivalent to a factored third order term.
    fn setup() -> (Factor, FactoredThirdOrder, Weights, [TensorId; 3], VarMap) {
        let mut rng = StdRng::seed_from_u64(21);
        let mut weights = Weights::new();
        let wa = weights.push("wa", random(&[3, 4], &mut rng)).unwrap();
        let wb = weights.push("wb", random(&[2, 4], &mut rng)).unwrap();
        let wc = weights.push("wc", random(&[5, 4], &mut rng)).unwrap();

        let vmap = VarMap::new()
            .with(UnitId(0), random(&[3, 3], &mut rng))
            .with(UnitId(1), random(&[3, 2], &mut rng))
            .with(UnitId(2), random(&[3, 5], &mut rng));

        let bindings = [
            Binding::new(UnitId(0), vec![3]),
            Binding::new(UnitId(1), vec![2]),
            Binding::new(UnitId(2), vec![5]),
        ];
        let f = Binding::new(UnitId(3), vec![4]);

        let mut factor = Factor::new("f", f.clone());
        for (b, w) in bindings.iter().zip([wa, wb, wc]) {
            let prod = Product::new(vec![b.clone(), f.clone()], vec![w]).unwrap();
            factor.add(ParamSet::Prod(prod)).unwrap();
        }

        let reference = FactoredThirdOrder::new(bindings.to_vec(), vec![wa, wb, wc]).unwrap();
        (factor, reference, weights, [wa, wb, wc], vmap)
    }

    #[test]
    fn queries_before_finalization_fail() {
        let (factor, _, weights, [wa, ..], vmap) = setup();

        let err = factor.energy_term(&vmap, &weights);
        assert!(matches!(err, Err(RbmErr::NotInitialized { ref factor }) if factor == "f"));
        assert!(factor.activation_term(UnitId(0), &vmap, &weights).is_err());
        assert!(factor.energy_gradient_sum(wa, &vmap, &weights).is_err());
    }

    #[test]
    fn finalized_factors_are_frozen() {
        let (mut factor, _, _, [wa, ..], _) = setup();
        factor.finalize().unwrap();

        let prod = Product::new(
            vec![Binding::new(UnitId(0), vec![3]), Binding::new(UnitId(3), vec![4])],
            vec![wa],
        )
        .unwrap();
        let err = factor.add(ParamSet::Prod(prod));
        assert!(matches!(err, Err(RbmErr::StructuralMismatch(_))));
    }

    #[test]
    fn a_single_set_is_not_a_factor() {
        let mut factor = Factor::new("f", Binding::new(UnitId(1), vec![2]));
        let prod = Product::new(
            vec![Binding::new(UnitId(0), vec![3]), Binding::new(UnitId(1), vec![2])],
            vec![TensorId(0)],
        )
        .unwrap();
        factor.add(ParamSet::Prod(prod)).unwrap();

        assert!(matches!(factor.finalize(), Err(RbmErr::StructuralMismatch(_))));
    }

    #[test]
    fn sets_must_bind_the_factor_group() {
        let mut factor = Factor::new("f", Binding::new(UnitId(3), vec![4]));
        let prod = Product::new(
            vec![Binding::new(UnitId(0), vec![3]), Binding::new(UnitId(1), vec![2])],
            vec![TensorId(0)],
        )
        .unwrap();

        assert!(factor.add(ParamSet::Prod(prod)).is_err());
    }

    #[test]
    fn matches_the_factored_third_order_term() {
        let (mut factor, reference, weights, vars, vmap) = setup();
        factor.finalize().unwrap();
        factor.validate(&weights).unwrap();

        assert_eq!(factor.units(), vec![UnitId(0), UnitId(1), UnitId(2)]);
        assert_eq!(factor.variables(), vars.to_vec());

        let close = |a: &Tensor, b: &Tensor| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-4);

        let e = factor.energy_term(&vmap, &weights).unwrap();
        let expected = reference.energy_term(&vmap, &weights).unwrap();
        assert!(close(&e.into_dyn(), &expected.into_dyn()));

        for unit in 0..3 {
            let got = factor.activation_term(UnitId(unit), &vmap, &weights).unwrap();
            let expected = reference.activation_term(UnitId(unit), &vmap, &weights).unwrap();
            assert!(close(&got, &expected), "unit {unit}");
        }

        for var in vars {
            let got = factor.energy_gradient_sum(var, &vmap, &weights).unwrap();
            let expected = reference.energy_gradient_sum(var, &vmap, &weights).unwrap();
            assert!(close(&got, &expected));

            let per_example = factor.energy_gradient(var, &vmap, &weights).unwrap();
            assert!(close(&per_example.sum_axis(Axis(0)), &got));
        }
    }
}
