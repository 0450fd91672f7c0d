use crate::{
    Result,
    model::Model,
    sampling::NoiseSource,
    units::{Capability, UnitId, VarMap},
};

/// The outcome of resampling a set of unit groups once.
#[derive(Debug, Clone)]
pub struct GibbsStep {
    /// The activations the new values were drawn from.
    pub activation: VarMap,
    /// The values recorded for statistics.
    pub stats: VarMap,
    /// The values carried along the chain.
    pub gibbs: VarMap,
}

/// Resamples `units` given the rest of `vmap`.
///
/// A group listed in `mean_field_for_stats` reports its mean field in `stats` instead of a
/// sample, and likewise for `mean_field_for_gibbs` and `gibbs`. Both outputs are served by a
/// single sampling pass and a single mean field pass, so a group sampled for both outputs holds
/// the very same sample in each, and proxies always agree with their primaries.
///
/// # Errors
/// `UnsupportedOperation` if a group must be sampled (or mean fielded) and its kind can't.
pub fn gibbs_step(
    model: &Model,
    vmap: &VarMap,
    units: &[UnitId],
    mean_field_for_stats: &[UnitId],
    mean_field_for_gibbs: &[UnitId],
    noise: &mut dyn NoiseSource,
) -> Result<GibbsStep> {
    let units = model.complete_units(units)?;
    let primary_of = |id: UnitId| model.unit(id).map(|u| u.primary().unwrap_or(id));

    let mut to_sample = Vec::new();
    let mut to_mean_field = Vec::new();
    for &id in &units {
        let primary = primary_of(id)?;
        if primary != id {
            continue;
        }

        let stats_mf = mean_field_for_stats.iter().any(|&u| primary_of(u).ok() == Some(primary));
        let gibbs_mf = mean_field_for_gibbs.iter().any(|&u| primary_of(u).ok() == Some(primary));

        if !(stats_mf && gibbs_mf) {
            to_sample.push(id);
        }
        if stats_mf || gibbs_mf {
            to_mean_field.push(id);
        }
    }

    model.check_capability(&to_sample, Capability::Sample)?;
    model.check_capability(&to_mean_field, Capability::MeanField)?;

    let activation = model.activations(&units, vmap)?;
    let samples = model.sample_from_activations(&to_sample, &activation, noise)?;
    let means = model.mean_field_from_activations(&to_mean_field, &activation)?;

    let mut stats = VarMap::new();
    let mut gibbs = VarMap::new();
    for &id in &units {
        let primary = primary_of(id)?;
        let pick = |mean_field: &[UnitId]| {
            let source = if mean_field.iter().any(|&u| primary_of(u).ok() == Some(primary)) {
                &means
            } else {
                &samples
            };
            source.require(id).cloned()
        };

        stats = stats.with(id, pick(mean_field_for_stats)?);
        gibbs = gibbs.with(id, pick(mean_field_for_gibbs)?);
    }

    Ok(GibbsStep {
        activation,
        stats,
        gibbs,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        RbmErr,
        model::{ModelBuilder, presets},
    };

    fn setup() -> (Model, UnitId, UnitId, VarMap) {
        let mut rng = StdRng::seed_from_u64(5);
        let model = ModelBuilder::new()
            .build(&presets::binary_binary(4, 3), &mut rng)
            .unwrap();
        let v = model.unit_id("v").unwrap();
        let h = model.unit_id("h").unwrap();
        let vmap = VarMap::new().with(v, array![[1., 0., 1., 1.], [0., 0., 1., 0.]].into_dyn());
        (model, v, h, vmap)
    }

    #[test]
    fn sampled_outputs_share_the_sample() {
        let (model, _, h, vmap) = setup();
        let step = gibbs_step(&model, &vmap, &[h], &[], &[], &mut StdRng::seed_from_u64(0))
            .unwrap();

        assert_eq!(step.stats, step.gibbs);
        let sample = step.gibbs.require(h).unwrap();
        assert_eq!(sample.shape(), &[2, 3]);
        assert!(sample.iter().all(|&x| x == 0. || x == 1.));
    }

    #[test]
    fn stats_may_use_the_mean_field() {
        let (model, _, h, vmap) = setup();
        let step = gibbs_step(&model, &vmap, &[h], &[h], &[], &mut StdRng::seed_from_u64(0))
            .unwrap();

        let mean = model.mean_field(&[h], &vmap).unwrap();
        assert_eq!(step.stats.require(h).unwrap(), mean.require(h).unwrap());
        assert!(step.gibbs.require(h).unwrap().iter().all(|&x| x == 0. || x == 1.));
        assert_eq!(
            step.activation.require(h).unwrap(),
            &model.activation(h, &vmap).unwrap()
        );
    }

    #[test]
    fn full_mean_field_draws_nothing() {
        let (model, _, h, vmap) = setup();

        let mut a = StdRng::seed_from_u64(0);
        gibbs_step(&model, &vmap, &[h], &[h], &[h], &mut a).unwrap();

        let mut b = StdRng::seed_from_u64(0);
        assert_eq!(a.random::<u64>(), b.random::<u64>());
    }

    #[test]
    fn bare_groups_cant_be_resampled() {
        let model = ModelBuilder::new()
            .build(
                &presets::factored_third_order(3, 2, 2, 4),
                &mut StdRng::seed_from_u64(0),
            )
            .unwrap();
        let c = model.unit_id("c").unwrap();

        let err = gibbs_step(&model, &VarMap::new(), &[c], &[], &[], &mut StdRng::seed_from_u64(0));
        assert!(matches!(err, Err(RbmErr::UnsupportedOperation { .. })));
    }
}
