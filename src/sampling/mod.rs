mod gamma;
mod noise;
mod samplers;

pub use gamma::{gamma_approx, log_gamma, log_gamma_lanczos, log_gamma_stirling};
pub use noise::NoiseSource;
pub use samplers::{
    bernoulli, categorical, exponential, gaussian, laplacian, softmax, truncated_exponential,
    truncated_exponential_mean, truncated_exponential_mean_scalar,
};
