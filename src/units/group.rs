use std::f32::consts::PI;

use ndarray::{Array1, Zip};

use super::{Capability, UnitId, UnitKind};
use crate::{
    RbmErr, Result,
    sampling::{
        NoiseSource, bernoulli, exponential, gamma_approx, gaussian, log_gamma, softmax,
        truncated_exponential, truncated_exponential_mean,
    },
    tensor::{Tensor, log_sum_exp_last, sigmoid, softmax_last, softplus, sum_except_batch},
};

/// The activation of a unit group: the one of the group itself and, for kinds parameterized
/// through a proxy, the one of that proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub primary: Tensor,
    pub proxy: Option<Tensor>,
}

impl Activation {
    pub fn new(primary: Tensor) -> Self {
        Self {
            primary,
            proxy: None,
        }
    }
}

/// A named group of random variables sharing a distribution kind.
#[derive(Debug, Clone)]
pub struct UnitGroup {
    pub(crate) id: UnitId,
    pub(crate) name: String,
    pub(crate) shape: Vec<usize>,
    pub(crate) kind: UnitKind,
    pub(crate) primary: Option<UnitId>,
    pub(crate) proxies: Vec<UnitId>,
}

use UnitKind::*;

impl UnitGroup {
    pub(crate) fn new(id: UnitId, name: &str, shape: Vec<usize>, kind: UnitKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            shape,
            kind,
            primary: None,
            proxies: Vec::new(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shape of a single example, without the batch axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// The group this one is a proxy of.
    pub fn primary(&self) -> Option<UnitId> {
        self.primary
    }

    pub fn proxies(&self) -> &[UnitId] {
        &self.proxies
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.kind.supports(capability)
    }

    /// Fails with `UnsupportedOperation` unless the group's kind defines `capability`.
    pub fn check(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(self.unsupported(capability))
        }
    }

    fn unsupported(&self, capability: Capability) -> RbmErr {
        RbmErr::UnsupportedOperation {
            group: self.name.clone(),
            kind: self.kind.name(),
            op: capability.name(),
        }
    }

    /// Computes a proxy's value out of its primary's.
    pub fn derive(&self, primary_value: &Tensor) -> Result<Tensor> {
        match self.kind {
            Proxy(f) => Ok(f.apply(primary_value)),
            _ => Err(RbmErr::StructuralMismatch(format!(
                "unit group '{}' is not a proxy",
                self.name
            ))),
        }
    }

    fn proxy_activation<'a>(&self, act: &'a Activation) -> Result<&'a Tensor> {
        act.proxy.as_ref().ok_or_else(|| {
            RbmErr::StructuralMismatch(format!(
                "unit group '{}' of kind {} needs a proxy activation",
                self.name,
                self.kind.name()
            ))
        })
    }

    /// Draws a value of the group given its activation.
    pub fn sample(&self, act: &Activation, noise: &mut dyn NoiseSource) -> Result<Tensor> {
        let a = &act.primary;

        let sample = match self.kind {
            Binary => bernoulli(&sigmoid(a), noise),
            SymmetricBinary => bernoulli(&sigmoid(&(a * 2.)), noise).mapv(|x| 2. * x - 1.),
            Gaussian => gaussian(a, &Tensor::ones(a.raw_dim()), noise),
            LearntPrecisionGaussian => {
                let (mean, var) = precision_moments(a, self.proxy_activation(act)?);
                gaussian(&mean, &var, noise)
            }
            Softmax => softmax(a, false, noise),
            SoftmaxWithZero => softmax(a, true, noise),
            TruncatedExponential => truncated_exponential(&-a, noise),
            Exponential => exponential(&-a, noise),
            Gamma => {
                let (k, rate) = gamma_parameters(a, self.proxy_activation(act)?);
                gamma_approx(&k, &rate.mapv(f32::recip), noise)
            }
            Bare | Proxy(_) => return Err(self.unsupported(Capability::Sample)),
        };

        Ok(sample)
    }

    /// The expected value of the group given its activation.
    pub fn mean_field(&self, act: &Activation) -> Result<Tensor> {
        let a = &act.primary;

        let mean = match self.kind {
            Binary => sigmoid(a),
            SymmetricBinary => a.mapv(f32::tanh),
            Gaussian => a.clone(),
            LearntPrecisionGaussian => precision_moments(a, self.proxy_activation(act)?).0,
            Softmax => softmax_last(a, false),
            SoftmaxWithZero => softmax_last(a, true),
            TruncatedExponential => truncated_exponential_mean(&-a),
            Exponential => a.mapv(|a| -1. / a),
            Gamma => {
                let (k, rate) = gamma_parameters(a, self.proxy_activation(act)?);
                k / rate
            }
            Bare | Proxy(_) => return Err(self.unsupported(Capability::MeanField)),
        };

        Ok(mean)
    }

    /// The group's contribution to the free energy once it is summed out, one value per example.
    pub fn free_energy_term(&self, act: &Activation) -> Result<Array1<f32>> {
        let a = &act.primary;

        let term = match self.kind {
            Binary => -sum_except_batch(&a.mapv(softplus))?,
            SymmetricBinary => -sum_except_batch(&a.mapv(log_2cosh))?,
            Gaussian => -sum_except_batch(&a.mapv(|a| a * a / 2.))?,
            LearntPrecisionGaussian => {
                let b = self.proxy_activation(act)?;
                let mut t = a.clone();
                Zip::from(&mut t)
                    .and(b)
                    .for_each(|t, &b| *t = *t * *t / (4. * b) - 0.5 * (PI / -b).ln());
                sum_except_batch(&t)?
            }
            Softmax => -sum_except_batch(&log_sum_exp_last(a, false))?,
            SoftmaxWithZero => -sum_except_batch(&log_sum_exp_last(a, true))?,
            TruncatedExponential => -sum_except_batch(&a.mapv(log_unit_interval_partition))?,
            Exponential => sum_except_batch(&a.mapv(|a| (-a).ln()))?,
            Gamma => {
                let (k, rate) = gamma_parameters(a, self.proxy_activation(act)?);
                let t = log_gamma(&k) - &k * &rate.mapv(f32::ln);
                -sum_except_batch(&t)?
            }
            Bare | Proxy(_) => return Err(self.unsupported(Capability::FreeEnergy)),
        };

        Ok(term)
    }

    /// The log density (or mass) of `x` given the activation, one value per example.
    pub fn log_prob(&self, x: &Tensor, act: &Activation) -> Result<Array1<f32>> {
        let a = &act.primary;

        let log_p = match self.kind {
            Binary => sum_except_batch(&(x * a - a.mapv(softplus)))?,
            SymmetricBinary => sum_except_batch(&(x * a - a.mapv(log_2cosh)))?,
            Gaussian => {
                let half_log_2pi = 0.5 * (2. * PI).ln();
                sum_except_batch(&(x - a).mapv(|d| -d * d / 2. - half_log_2pi))?
            }
            LearntPrecisionGaussian => {
                let (mean, var) = precision_moments(a, self.proxy_activation(act)?);
                let mut t = x - &mean;
                Zip::from(&mut t)
                    .and(&var)
                    .for_each(|d, &var| *d = -0.5 * (2. * PI * var).ln() - *d * *d / (2. * var));
                sum_except_batch(&t)?
            }
            Softmax => sum_except_batch(&(x * a))? - sum_except_batch(&log_sum_exp_last(a, false))?,
            SoftmaxWithZero => {
                sum_except_batch(&(x * a))? - sum_except_batch(&log_sum_exp_last(a, true))?
            }
            TruncatedExponential => {
                sum_except_batch(&(x * a - a.mapv(log_unit_interval_partition)))?
            }
            Exponential => sum_except_batch(&(x * a + a.mapv(|a| (-a).ln())))?,
            Gamma => {
                let (k, rate) = gamma_parameters(a, self.proxy_activation(act)?);
                let t = &k * &rate.mapv(f32::ln) - log_gamma(&k) + (&k - 1.) * x.mapv(f32::ln)
                    - &rate * x;
                sum_except_batch(&t)?
            }
            Bare | Proxy(_) => return Err(self.unsupported(Capability::LogProb)),
        };

        Ok(log_p)
    }
}

/// Mean and variance of a Gaussian with activation `a` on `x` and `b` on `x²` (`b < 0`).
fn precision_moments(a: &Tensor, b: &Tensor) -> (Tensor, Tensor) {
    let precision = b * -2.;
    (a / &precision, precision.mapv(f32::recip))
}

/// Shape and rate of a Gamma with activation `a` on `x` and `b` on `ln x`.
fn gamma_parameters(a: &Tensor, b: &Tensor) -> (Tensor, Tensor) {
    (b + 1., -a)
}

fn log_2cosh(a: f32) -> f32 {
    a.abs() + (-2. * a.abs()).exp().ln_1p()
}

/// `ln ∫₀¹ e^{ax} dx = ln((eᵃ - 1) / a)`.
fn log_unit_interval_partition(a: f32) -> f32 {
    if a.abs() < 1e-3 {
        return a / 2. + a * a / 24.;
    }

    if a > 0. {
        a + (-(-a).exp_m1()).ln() - a.ln()
    } else {
        (-a.exp_m1()).ln() - (-a).ln()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn group(kind: UnitKind) -> UnitGroup {
        UnitGroup::new(UnitId(0), "u", vec![2], kind)
    }

    #[test]
    fn unsupported_operations_name_the_group() {
        let bare = group(Bare);
        let act = Activation::new(ArrayD::zeros(IxDyn(&[1, 2])));

        let err = bare.mean_field(&act).unwrap_err();
        match err {
            RbmErr::UnsupportedOperation { group, kind, op } => {
                assert_eq!(group, "u");
                assert_eq!(kind, "bare");
                assert_eq!(op, "mean_field");
            }
            other => panic!("unexpected error {other}"),
        }

        let mut rng = StdRng::seed_from_u64(0);
        assert!(bare.sample(&act, &mut rng).is_err());
        assert!(bare.free_energy_term(&act).is_err());
    }

    #[test]
    fn binary_log_prob_normalizes() {
        let g = group(Binary);
        let act = Activation::new(array![[0.3, -1.2]].into_dyn());

        let mut total = 0.;
        for x in [[0., 0.], [0., 1.], [1., 0.], [1., 1.]] {
            let x = ArrayD::from_shape_vec(IxDyn(&[1, 2]), x.to_vec()).unwrap();
            total += g.log_prob(&x, &act).unwrap()[0].exp();
        }

        assert!((total - 1.).abs() < 1e-5);
    }

    #[test]
    fn truncated_exponential_partition_is_continuous() {
        for a in [1e-3f32, -1e-3] {
            let closed = if a > 0. {
                a + (-(-a).exp_m1()).ln() - a.ln()
            } else {
                (-a.exp_m1()).ln() - (-a).ln()
            };
            assert!((closed - log_unit_interval_partition(a * 0.999)).abs() < 1e-5);
        }

        assert!((log_unit_interval_partition(2.) - (2f32.exp_m1() / 2.).ln()).abs() < 1e-5);
        assert!((log_unit_interval_partition(-40.) - (1f32 / 40.).ln()).abs() < 1e-5);
    }

    #[test]
    fn learnt_precision_moments() {
        let mut g = group(LearntPrecisionGaussian);
        g.shape = vec![1];
        let act = Activation {
            primary: array![[2.]].into_dyn(),
            proxy: Some(array![[-0.5]].into_dyn()),
        };

        assert_eq!(g.mean_field(&act).unwrap()[[0, 0]], 2.);

        let mut rng = StdRng::seed_from_u64(1);
        let batch = Activation {
            primary: ArrayD::from_elem(IxDyn(&[20000, 1]), 2.),
            proxy: Some(ArrayD::from_elem(IxDyn(&[20000, 1]), -2.)),
        };
        let x = g.sample(&batch, &mut rng).unwrap();
        let mean = x.mean().unwrap_or_default();
        let var = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or_default();
        assert!((mean - 0.5).abs() < 0.02);
        assert!((var - 0.25).abs() < 0.02);
    }

    #[test]
    fn symmetric_binary_samples_are_signs() {
        let g = group(SymmetricBinary);
        let act = Activation::new(ArrayD::from_elem(IxDyn(&[5000, 2]), 0.5));

        let mut rng = StdRng::seed_from_u64(2);
        let x = g.sample(&act, &mut rng).unwrap();
        assert!(x.iter().all(|&v| v == 1. || v == -1.));

        let mean = x.mean().unwrap_or_default();
        assert!((mean - 0.5f32.tanh()).abs() < 0.03);
    }

    #[test]
    fn free_energy_of_a_single_binary_unit() {
        let g = group(Binary);
        let act = Activation::new(array![[0.7, -0.1]].into_dyn());

        let expected = -((1. + 0.7f32.exp()).ln() + (1. + (-0.1f32).exp()).ln());
        assert!((g.free_energy_term(&act).unwrap()[0] - expected).abs() < 1e-5);
    }
}
