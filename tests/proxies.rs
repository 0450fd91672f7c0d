use ndarray::{Array2, array};
use rand::{SeedableRng, rngs::StdRng};
use rbm::{
    model::{
        InitSpec, ModelBuilder, ModelSpec, ParamSpec, TensorSpec, UnitKindSpec, UnitSpec, presets,
    },
    units::VarMap,
};

#[test]
fn learnt_precision_proxies_square_their_samples() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(4);
    let model = ModelBuilder::new()
        .build(&presets::learnt_precision(4, 2), &mut rng)
        .unwrap();
    let v = model.unit_id("v").unwrap();
    let h = model.unit_id("h").unwrap();
    let precision = model.unit_id("v_precision").unwrap();

    let given = VarMap::new().with(h, array![[1., 0.], [0., 1.], [1., 1.]].into_dyn());
    let sample = model.sample(&[v], &given, &mut rng).unwrap();

    let x = sample.require(v).unwrap();
    assert_eq!(sample.require(precision).unwrap(), &x.mapv(|x| x * x));

    let mean = model.mean_field(&[v], &given).unwrap();
    let m = mean.require(v).unwrap();
    assert_eq!(mean.require(precision).unwrap(), &m.mapv(|x| x * x));
}

#[test]
fn gamma_proxies_take_the_log_of_their_samples() {
    let _ = env_logger::builder().is_test(true).try_init();
    let spec = ModelSpec {
        units: vec![
            UnitSpec::new("v", vec![3], UnitKindSpec::Gaussian),
            UnitSpec::new("g", vec![2], UnitKindSpec::Gamma),
        ],
        tensors: vec![
            TensorSpec::new("w", vec![3, 2], InitSpec::Const { value: 0.1 }),
            TensorSpec::new("bg", vec![2], InitSpec::Const { value: -2. }),
            TensorSpec::new("bg_log", vec![2], InitSpec::Const { value: 0.5 }),
        ],
        params: vec![
            ParamSpec::prod("v", "g", "w"),
            ParamSpec::bias("g", "bg"),
            ParamSpec::bias("g_log", "bg_log"),
        ],
    };
    let mut rng = StdRng::seed_from_u64(6);
    let model = ModelBuilder::new().build(&spec, &mut rng).unwrap();
    let v = model.unit_id("v").unwrap();
    let g = model.unit_id("g").unwrap();
    let log = model.unit_id("g_log").unwrap();

    let given = VarMap::new().with(v, Array2::zeros((8, 3)).into_dyn());
    let sample = model.sample(&[g], &given, &mut rng).unwrap();

    let x = sample.require(g).unwrap();
    assert!(x.iter().all(|&x| x > 0.));
    assert_eq!(sample.require(log).unwrap(), &x.mapv(f32::ln));

    // Shape 1.5 and rate 2 on every unit.
    let mean = model.mean_field(&[g], &given).unwrap();
    assert!(mean.require(g).unwrap().iter().all(|&m| (m - 0.75).abs() < 1e-6));
}
