//! Specifications of commonly used model shapes.
//!
//! Every preset names its visible group `v` and its hidden group `h`. Interaction weights start
//! from a narrow normal distribution and biases at zero.

use super::{InitSpec, ModelSpec, ParamSpec, TensorSpec, UnitKindSpec, UnitSpec};
use crate::params::Transform;

fn small() -> InitSpec {
    InitSpec::Normal {
        mean: 0.,
        std_dev: 0.01,
    }
}

fn bipartite(visible: UnitKindSpec, nv: usize, nh: usize) -> ModelSpec {
    ModelSpec {
        units: vec![
            UnitSpec::new("v", vec![nv], visible),
            UnitSpec::new("h", vec![nh], UnitKindSpec::Binary),
        ],
        tensors: vec![
            TensorSpec::new("w", vec![nv, nh], small()),
            TensorSpec::new("bv", vec![nv], InitSpec::zeros()),
            TensorSpec::new("bh", vec![nh], InitSpec::zeros()),
        ],
        params: vec![
            ParamSpec::prod("v", "h", "w"),
            ParamSpec::bias("v", "bv"),
            ParamSpec::bias("h", "bh"),
        ],
    }
}

/// Binary visible and hidden groups.
pub fn binary_binary(nv: usize, nh: usize) -> ModelSpec {
    bipartite(UnitKindSpec::Binary, nv, nh)
}

/// Unit variance Gaussian visible group, binary hidden group.
pub fn gaussian_binary(nv: usize, nh: usize) -> ModelSpec {
    bipartite(UnitKindSpec::Gaussian, nv, nh)
}

/// Gaussian visible group with a learnt per unit precision, binary hidden group.
///
/// The precision bias `v_precision_raw` goes through a negated softplus so that the precision
/// stays positive whatever the updates do to the raw tensor.
pub fn learnt_precision(nv: usize, nh: usize) -> ModelSpec {
    let mut spec = bipartite(UnitKindSpec::LearntPrecisionGaussian, nv, nh);
    spec.tensors
        .push(TensorSpec::new("v_precision_raw", vec![nv], InitSpec::zeros()));
    spec.params.push(ParamSpec::transformed(
        Transform::NegSoftplus,
        "v_precision_raw",
        ParamSpec::bias("v_precision", "v_precision_raw"),
    ));
    spec
}

/// `nv` one-hot visible variables of `states` states each, binary hidden group.
pub fn softmax_visible(nv: usize, states: usize, nh: usize) -> ModelSpec {
    ModelSpec {
        units: vec![
            UnitSpec::new("v", vec![nv, states], UnitKindSpec::Softmax),
            UnitSpec::new("h", vec![nh], UnitKindSpec::Binary),
        ],
        tensors: vec![
            TensorSpec::new("w", vec![nv, states, nh], small()),
            TensorSpec::new("bv", vec![nv, states], InitSpec::zeros()),
            TensorSpec::new("bh", vec![nh], InitSpec::zeros()),
        ],
        params: vec![
            ParamSpec::advanced_prod("v", "h", "w"),
            ParamSpec::bias("v", "bv"),
            ParamSpec::bias("h", "bh"),
        ],
    }
}

/// Binary `[maps, height, width]` visible group convolved into binary hidden feature maps, with
/// one bias per map.
pub fn convolutional(
    visible: [usize; 3],
    hidden_maps: usize,
    filter: [usize; 2],
) -> ModelSpec {
    let [maps, height, width] = visible;
    let hidden = vec![
        hidden_maps,
        (height + 1).saturating_sub(filter[0]),
        (width + 1).saturating_sub(filter[1]),
    ];

    ModelSpec {
        units: vec![
            UnitSpec::new("v", visible.to_vec(), UnitKindSpec::Binary),
            UnitSpec::new("h", hidden, UnitKindSpec::Binary),
        ],
        tensors: vec![
            TensorSpec::new("w", vec![hidden_maps, maps, filter[0], filter[1]], small()),
            TensorSpec::new("bv", vec![maps], InitSpec::zeros()),
            TensorSpec::new("bh", vec![hidden_maps], InitSpec::zeros()),
        ],
        params: vec![
            ParamSpec::conv2d("v", "h", "w"),
            ParamSpec::shared_bias("v", "bv", 2),
            ParamSpec::shared_bias("h", "bh", 2),
        ],
    }
}

/// Binary visible and hidden groups gated by a `Bare` context group `c` through a factor `f`
/// of `factors` units.
pub fn factored_third_order(nv: usize, nh: usize, nc: usize, factors: usize) -> ModelSpec {
    ModelSpec {
        units: vec![
            UnitSpec::new("v", vec![nv], UnitKindSpec::Binary),
            UnitSpec::new("h", vec![nh], UnitKindSpec::Binary),
            UnitSpec::new("c", vec![nc], UnitKindSpec::Bare),
        ],
        tensors: vec![
            TensorSpec::new("wv", vec![nv, factors], small()),
            TensorSpec::new("wh", vec![nh, factors], small()),
            TensorSpec::new("wc", vec![nc, factors], small()),
            TensorSpec::new("bv", vec![nv], InitSpec::zeros()),
            TensorSpec::new("bh", vec![nh], InitSpec::zeros()),
        ],
        params: vec![
            ParamSpec::Factor {
                name: "f".to_string(),
                size: factors,
                params: vec![
                    ParamSpec::prod("v", "f", "wv"),
                    ParamSpec::prod("h", "f", "wh"),
                    ParamSpec::prod("c", "f", "wc"),
                ],
            },
            ParamSpec::bias("v", "bv"),
            ParamSpec::bias("h", "bh"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::model::ModelBuilder;

    #[test]
    fn every_preset_builds() {
        let specs = [
            binary_binary(6, 3),
            gaussian_binary(6, 3),
            learnt_precision(6, 3),
            softmax_visible(4, 3, 2),
            convolutional([2, 6, 5], 3, [3, 2]),
            factored_third_order(4, 3, 2, 5),
        ];

        for spec in &specs {
            let model = ModelBuilder::new().build(spec, &mut StdRng::seed_from_u64(0));
            assert!(model.is_ok(), "{model:?}");
        }
    }
}
