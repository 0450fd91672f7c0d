mod conv;
mod ops;
mod weights;

pub use conv::{conv2d_full, conv2d_valid, conv2d_weight_gradient};
pub use ops::{
    flatten_batch, log_sum_exp_last, mean_trailing, sigmoid, softmax_last, softplus,
    sum_except_batch,
};
pub use weights::{Substituted, TensorId, TensorLookup, Weights};

use ndarray::ArrayD;

/// Every value flowing through the framework: axis 0 is the minibatch axis for unit values and
/// activations, weight tensors have no batch axis.
pub type Tensor = ArrayD<f32>;
