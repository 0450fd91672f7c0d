use std::num::NonZeroUsize;

use ndarray::{Array2, Axis, array};
use rand::{SeedableRng, rngs::StdRng};
use rbm::{
    model::{InitSpec, ModelBuilder, presets},
    sampling::NoiseSource,
    stats::{ContrastiveDivergence, Phase},
    tensor::{Tensor, sigmoid},
    training::{CdConfig, Dataset, MonitorSpec, TrainerBuilder, TrainingConfig},
    units::VarMap,
};

const SEED: u64 = 42;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn weights() -> Array2<f32> {
    Array2::from_shape_fn((6, 3), |(i, j)| ((i * 3 + j) as f32 * 0.37).sin())
}

fn model() -> rbm::model::Model {
    let mut spec = presets::binary_binary(6, 3);
    spec.tensors[0].init = InitSpec::Values {
        values: weights().into_iter().collect(),
    };
    spec.tensors[1].init = InitSpec::Values {
        values: vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6],
    };
    spec.tensors[2].init = InitSpec::Values {
        values: vec![0.25, -0.5, 0.75],
    };

    ModelBuilder::new()
        .build(&spec, &mut StdRng::seed_from_u64(0))
        .unwrap()
}

fn data() -> Tensor {
    array![[1., 0., 1., 1., 0., 0.]].into_dyn()
}

/// Replays CD-1 by hand with an identically seeded generator: h0, v1, h1.
fn replay() -> [Array2<f32>; 3] {
    let w = weights();
    let bv = array![0.1, -0.2, 0.3, -0.4, 0.5, -0.6];
    let bh = array![0.25, -0.5, 0.75];
    let mut rng = StdRng::seed_from_u64(SEED);

    let mut draw = |p: Array2<f32>| -> Array2<f32> {
        let u: Array2<f32> = rng.uniform(p.shape()).into_dimensionality().unwrap();
        let mut out = p;
        out.zip_mut_with(&u, |p, &u| *p = if u < *p { 1. } else { 0. });
        out
    };
    let prob = |a: Array2<f32>| -> Array2<f32> {
        sigmoid(&a.into_dyn()).into_dimensionality().unwrap()
    };

    let v0: Array2<f32> = data().into_dimensionality().unwrap();
    let h0 = draw(prob(v0.dot(&w) + &bh));
    let v1 = draw(prob(h0.dot(&w.t()) + &bv));
    let h1 = draw(prob(v1.dot(&w) + &bh));
    [h0, v1, h1]
}

#[test]
fn cd1_matches_a_hand_replay() {
    init_logger();
    let model = model();
    let v = model.unit_id("v").unwrap();
    let h = model.unit_id("h").unwrap();
    let batch = VarMap::new().with(v, data());

    let cd = ContrastiveDivergence::new(&model, &CdConfig::new("v", "h", NonZeroUsize::MIN))
        .unwrap();
    let stats = cd
        .run(&model, &batch, None, &mut StdRng::seed_from_u64(SEED))
        .unwrap();

    let v0: Array2<f32> = data().into_dimensionality().unwrap();
    let bh = array![0.25, -0.5, 0.75];
    let expected = sigmoid(&(v0.dot(&weights()) + &bh).into_dyn());
    let means = sigmoid(stats.activations(Phase::Data).require(h).unwrap());
    for (a, b) in means.iter().zip(&expected) {
        assert!((a - b).abs() < 1e-6);
    }

    let [h0, v1, h1] = replay();
    assert_eq!(stats.values(Phase::Data).require(h).unwrap(), &h0.into_dyn());
    assert_eq!(stats.values(Phase::Model).require(v).unwrap(), &v1.into_dyn());
    assert_eq!(stats.values(Phase::Model).require(h).unwrap(), &h1.into_dyn());
}

fn config(batch_size: usize) -> TrainingConfig {
    TrainingConfig {
        cd: CdConfig::new("v", "h", NonZeroUsize::MIN),
        learning_rate: 0.5,
        momentum: 0.,
        weight_decay: 0.,
        sparsity: vec![],
        bounds: vec![],
        monitors: vec![MonitorSpec::ReconstructionMse],
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        epochs: NonZeroUsize::MIN,
        shuffle: false,
        seed: Some(SEED),
    }
}

#[test]
fn one_training_step_applies_the_cd_update() {
    init_logger();
    let mut model = model();
    let v = model.unit_id("v").unwrap();
    let w = model.tensor_id("w").unwrap();
    let bh = model.tensor_id("bh").unwrap();
    let before = model.tensor(w).unwrap().clone();
    let bh_before = model.tensor(bh).unwrap().clone();

    let config = config(1);
    let mut trainer = TrainerBuilder::new().build(&model, &config).unwrap();
    let mut dataset = Dataset::new(VarMap::new().with(v, data())).unwrap();

    let reports = trainer.train(&mut model, &mut dataset).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].batches, 1);

    let [h0, v1, h1] = replay();
    let v0: Array2<f32> = data().into_dimensionality().unwrap();
    let expected = &before + &((v0.t().dot(&h0) - v1.t().dot(&h1)) * 0.5).into_dyn();
    for (a, b) in model.tensor(w).unwrap().iter().zip(&expected) {
        assert!((a - b).abs() < 1e-6);
    }

    let expected_bh =
        &bh_before + &((h0.sum_axis(Axis(0)) - h1.sum_axis(Axis(0))) * 0.5).into_dyn();
    for (a, b) in model.tensor(bh).unwrap().iter().zip(&expected_bh) {
        assert!((a - b).abs() < 1e-6);
    }

    let mse = (&data() - &v1.into_dyn()).mapv(|d| d * d).sum();
    assert_eq!(reports[0].monitors, vec![(MonitorSpec::ReconstructionMse, mse)]);
}

#[test]
fn short_final_batches_take_a_per_example_step() {
    init_logger();
    let train = |batch_size: usize| {
        let mut model = model();
        let v = model.unit_id("v").unwrap();
        let w = model.tensor_id("w").unwrap();
        let mut trainer = TrainerBuilder::new()
            .build(&model, &config(batch_size))
            .unwrap();
        let mut dataset = Dataset::new(VarMap::new().with(v, data())).unwrap();
        trainer.train(&mut model, &mut dataset).unwrap();
        model.tensor(w).unwrap().clone()
    };

    // A single example under a batch size of 4 is one short batch of 1.
    assert_eq!(train(4), train(1));
}
