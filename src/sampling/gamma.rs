use std::f64::consts::PI;

use ndarray::Zip;

use super::NoiseSource;
use crate::tensor::Tensor;

const LANCZOS_G: f64 = 7.;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Stirling's series for `ln Γ(x)`, truncated after the `x⁻³` term.
///
/// Cheap and accurate for large arguments, but it diverges as `x` approaches zero.
pub fn log_gamma_stirling(x: f32) -> f32 {
    let x = x as f64;
    let series = 1. / (12. * x) - 1. / (360. * x.powi(3));
    ((x - 0.5) * x.ln() - x + 0.5 * (2. * PI).ln() + series) as f32
}

/// Lanczos approximation of `ln |Γ(x)|`.
///
/// Arguments below `0.5` go through the reflection formula, so the series itself is only ever
/// evaluated at arguments `≥ 0.5`.
pub fn log_gamma_lanczos(x: f32) -> f32 {
    let x = x as f64;
    if x < 0.5 {
        let reflected = (PI / (PI * x).sin().abs()).ln();
        return (reflected - lanczos_series(1. - x)) as f32;
    }

    lanczos_series(x) as f32
}

fn lanczos_series(x: f64) -> f64 {
    let z = x - 1.;
    let (first, rest) = LANCZOS_COEFFICIENTS.split_at(1);
    let sum = rest
        .iter()
        .enumerate()
        .fold(first[0], |acc, (i, c)| acc + c / (z + i as f64 + 1.));

    let t = z + LANCZOS_G + 0.5;
    0.5 * (2. * PI).ln() + (z + 0.5) * t.ln() - t + sum.ln()
}

/// Elementwise `ln Γ`.
pub fn log_gamma(x: &Tensor) -> Tensor {
    x.mapv(log_gamma_lanczos)
}

/// Approximate Gamma sampler using the Wilson–Hilferty transformation: a cubed normal,
/// `kθ (1 - 1/(9k) + z/(3√k))³`.
///
/// The approximation can go negative for small shapes, those values are clamped to the smallest
/// positive float so the support stays `(0, ∞)`.
pub fn gamma_approx(shape: &Tensor, scale: &Tensor, noise: &mut dyn NoiseSource) -> Tensor {
    let mut z = noise.normal(shape.shape());
    Zip::from(&mut z)
        .and(shape)
        .and(scale)
        .for_each(|z, &k, &theta| {
            let cube = (1. - 1. / (9. * k) + *z / (3. * k.sqrt())).powi(3);
            *z = (k * theta * cube).max(f32::MIN_POSITIVE);
        });
    z
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn lanczos_known_values() {
        let cases = [
            (1., 0.),
            (2., 0.),
            (0.5, 0.572_364_9),
            (5., 3.178_053_8),
            (0.1, 2.252_712_7),
            (10., 12.801_827),
            (-0.5, 1.265_512_1),
        ];

        for (x, expected) in cases {
            let got = log_gamma_lanczos(x);
            assert!((got - expected).abs() < 1e-4, "lgamma({x}) = {got}");
        }
    }

    #[test]
    fn stirling_is_accurate_away_from_zero() {
        for x in [5.0f32, 10., 30.] {
            let diff = (log_gamma_stirling(x) - log_gamma_lanczos(x)).abs();
            assert!(diff < 1e-3, "x = {x}");
        }

        assert!((log_gamma_stirling(0.05) - log_gamma_lanczos(0.05)).abs() > 1e-2);
    }

    #[test]
    fn gamma_moments() {
        let mut rng = StdRng::seed_from_u64(9);
        let shape = ArrayD::from_elem(IxDyn(&[40000]), 3.);
        let scale = ArrayD::from_elem(IxDyn(&[40000]), 2.);

        let x = gamma_approx(&shape, &scale, &mut rng);
        assert!(x.iter().all(|&v| v > 0.));

        let mean = x.mean().unwrap_or_default();
        let var = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or_default();
        assert!((mean - 6.).abs() < 0.1, "mean {mean}");
        assert!((var - 12.).abs() < 0.8, "var {var}");
    }

    #[test]
    fn tiny_shapes_stay_positive() {
        let mut rng = StdRng::seed_from_u64(10);
        let shape = ArrayD::from_elem(IxDyn(&[1000]), 0.05);
        let scale = ArrayD::from_elem(IxDyn(&[1000]), 1.);

        let x = gamma_approx(&shape, &scale, &mut rng);
        assert!(x.iter().all(|&v| v >= f32::MIN_POSITIVE));
    }
}
