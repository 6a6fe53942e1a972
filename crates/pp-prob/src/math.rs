//! Small numerically-stable math utilities used across probability code.
//!
//! Special functions come from `statrs`; this module only holds the stable
//! log/exp/sigmoid compositions the distributions and transforms share.

use statrs::function::erf::{erfc, erfc_inv};
use statrs::function::gamma::ln_gamma;

/// `ln(sqrt(2π))`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Natural log of π.
pub const LN_PI: f64 = 1.144_729_885_849_400_2;

/// `log(1 + exp(x))` without overflow for large `|x|`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    if x > 0.0 { x + (-x).exp().ln_1p() } else { x.exp().ln_1p() }
}

/// Logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        (1.0 + (-x).exp()).recip()
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `log(sigmoid(x)) = -log1pexp(-x)`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    -log1pexp(-x)
}

/// `c * ln(x)`, taken as zero when `c == 0` (so `0 * ln 0 = 0`).
#[inline]
pub fn xlogy(c: f64, x: f64) -> f64 {
    if c == 0.0 { 0.0 } else { c * x.ln() }
}

/// Reject a scalar kernel argument that is not finite and strictly positive.
#[inline]
pub(crate) fn require_positive(name: &str, v: f64) -> pp_core::Result<f64> {
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(pp_core::Error::InvalidParameter(format!("{} must be finite and > 0, got {}", name, v)))
    }
}

/// Stable softplus: `log(1 + exp(x))`.
#[inline]
pub fn softplus(x: f64) -> f64 {
    log1pexp(x)
}

/// Inverse of [`softplus`]: `ln(exp(y) - 1)` for `y > 0`.
#[inline]
pub fn softplus_inv(y: f64) -> f64 {
    // softplus(z) ~= z for large z
    if y > 20.0 { y } else { y.exp_m1().ln() }
}

/// `ln(p / (1 - p))`.
#[inline]
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Stable `log(1 - exp(x))` for `x <= 0`.
#[inline]
pub fn log1mexp(x: f64) -> f64 {
    if x > -std::f64::consts::LN_2 { (-x.exp_m1()).ln() } else { (-x.exp()).ln_1p() }
}

/// `ln B(a, b)`.
#[inline]
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// `ln C(n, k)` for real-valued `n >= k >= 0`.
#[inline]
pub fn ln_choose(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Standard normal CDF.
#[inline]
pub fn std_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile.
#[inline]
pub fn std_normal_icdf(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

/// Log of the standard normal survival function `ln(1 - Φ(x))`.
#[inline]
pub fn std_normal_log_sf(x: f64) -> f64 {
    (0.5 * erfc(x / std::f64::consts::SQRT_2)).ln()
}

/// Numerically stable softmax of a slice of logits.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let lse = pp_core::tensor::logsumexp(logits);
    logits.iter().map(|&l| (l - lse).exp()).collect()
}

/// `true` when `x` is (numerically) an integer.
#[inline]
pub fn is_integral(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_logistic_helpers_through_bernoulli_logits() {
        use crate::{Bernoulli, Distribution};
        use pp_core::tensor::vector;

        // Extreme logits stay finite and the two outcomes still sum to one.
        let logits = vector(&[-800.0, -3.0, 0.0, 2.5, 800.0]);
        let d = Bernoulli::from_logits(logits.clone()).unwrap();
        let lp1 = d.log_prob(&vector(&[1.0; 5])).unwrap();
        let lp0 = d.log_prob(&vector(&[0.0; 5])).unwrap();
        for ((l, a), b) in logits.iter().zip(lp1.iter()).zip(lp0.iter()) {
            assert_relative_eq!(*a, log_sigmoid(*l), epsilon = 1e-12);
            assert!(a.is_finite() && b.is_finite(), "logit {}: {} {}", l, a, b);
            assert_relative_eq!(a.exp() + b.exp(), 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(lp0[[4]], -800.0, epsilon = 1e-9);
        assert_relative_eq!(log1pexp(2.5), (1.0 + 2.5f64.exp()).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_xlogy_boundary() {
        assert_eq!(xlogy(0.0, 0.0), 0.0);
        assert_eq!(xlogy(1.5, 0.0), f64::NEG_INFINITY);
        assert_eq!(xlogy(-0.5, 0.0), f64::INFINITY);
        assert!(require_positive("rate", 0.0).is_err());
        assert!(require_positive("rate", f64::NAN).is_err());
    }

    #[test]
    fn test_logit_inverts_sigmoid() {
        for x in [-8.0, -1.0, 0.0, 0.3, 5.0] {
            assert_relative_eq!(logit(sigmoid(x)), x, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_softplus_inverse() {
        for y in [1e-6, 0.1, 1.0, 5.0, 30.0] {
            assert_relative_eq!(softplus(softplus_inv(y)), y, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_log1mexp_both_branches() {
        for x in [-1e-8, -0.1, -0.5, -2.0, -30.0] {
            let naive = (1.0 - f64::exp(x)).ln();
            assert_relative_eq!(log1mexp(x), naive, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_normal_cdf_quantile_roundtrip() {
        assert_relative_eq!(std_normal_cdf(0.0), 0.5, epsilon = 1e-15);
        for p in [0.001, 0.1, 0.5, 0.9, 0.999] {
            assert_relative_eq!(std_normal_cdf(std_normal_icdf(p)), p, epsilon = 1e-9);
        }
        assert_relative_eq!(std_normal_log_sf(0.0), 0.5f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_ln_choose_small() {
        assert_relative_eq!(ln_choose(5.0, 2.0), 10f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(ln_beta(1.0, 1.0), 0.0, epsilon = 1e-12);
    }
}
