//! Compound distributions with a conjugate prior integrated out.
//!
//! - [`BetaBinomial`]: `p ~ Beta(a, b)`, `k | p ~ Binomial(n, p)`.
//! - [`GammaPoisson`]: `lambda ~ Gamma(a, rate)`, `k | lambda ~ Poisson(lambda)`.
//!
//! Both sample hierarchically and evaluate the closed-form marginal.

use pp_core::tensor::{try_map2, try_map3, try_map4};
use pp_core::{Error, PrngKey, Result, Tensor};
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{check_param, enumerate_values, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::{ln_beta, ln_choose};

/// Log-PMF of `BetaBinomial(alpha, beta, n)` at `k`.
pub fn beta_binomial_logpmf(k: f64, alpha: f64, beta: f64, n: f64) -> Result<f64> {
    if !(alpha > 0.0 && beta > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "concentrations must be > 0, got alpha={} beta={}",
            alpha, beta
        )));
    }
    if k < 0.0 || k > n {
        return Err(Error::ConstraintViolation(format!("k must be in [0, n], got k={} n={}", k, n)));
    }
    Ok(ln_choose(n, k) + ln_beta(k + alpha, n - k + beta) - ln_beta(alpha, beta))
}

/// Beta-binomial distribution.
#[derive(Debug, Clone)]
pub struct BetaBinomial {
    concentration1: Tensor,
    concentration0: Tensor,
    total_count: Tensor,
    batch_shape: Vec<usize>,
}

impl BetaBinomial {
    /// `concentration1`/`concentration0` are the Beta prior's `alpha`/`beta`.
    pub fn new(concentration1: Tensor, concentration0: Tensor, total_count: Tensor) -> Result<Self> {
        check_param("concentration1", &Constraint::Positive, &concentration1)?;
        check_param("concentration0", &Constraint::Positive, &concentration0)?;
        check_param("total_count", &Constraint::nonnegative_integer(), &total_count)?;
        let batch_shape = params_shape(&[&concentration1, &concentration0, &total_count])?;
        Ok(Self { concentration1, concentration0, total_count, batch_shape })
    }
}

impl Distribution for BetaBinomial {
    fn name(&self) -> &'static str {
        "BetaBinomial"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::IntegerInterval(Tensor::zeros(self.total_count.raw_dim()), self.total_count.clone())
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![
            ("concentration1", Constraint::Positive),
            ("concentration0", Constraint::Positive),
            ("total_count", Constraint::nonnegative_integer()),
        ]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let params = [&self.concentration1, &self.concentration0, &self.total_count];
        sample_elementwise(key, &self.shape(sample_shape), &params, |rng, p| {
            let prob = crate::beta::draw(rng, p[0], p[1])?;
            crate::binomial::draw(rng, p[2], prob)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map4(value, &self.concentration1, &self.concentration0, &self.total_count, beta_binomial_logpmf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map3(&self.concentration1, &self.concentration0, &self.total_count, |a, b, n| Ok(n * a / (a + b)))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map3(&self.concentration1, &self.concentration0, &self.total_count, |a, b, n| {
            let s = a + b;
            Ok(n * a * b * (s + n) / (s * s * (s + 1.0)))
        })
    }

    fn has_enumerate_support(&self) -> bool {
        true
    }

    fn enumerate_support(&self, expand: bool) -> Result<Tensor> {
        let mut counts = self.total_count.iter();
        let n = counts.next().copied().unwrap_or(0.0);
        if counts.any(|&m| m != n) {
            return Err(Error::NotImplemented(
                "enumerate_support needs the same total_count across the batch".into(),
            ));
        }
        let values: Vec<f64> = (0..=n as u64).map(|k| k as f64).collect();
        enumerate_values(&values, &self.batch_shape, expand)
    }
}

/// Log-PMF of `GammaPoisson(alpha, rate)` at `k`.
pub fn gamma_poisson_logpmf(k: f64, alpha: f64, rate: f64) -> Result<f64> {
    if !(alpha > 0.0 && rate > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "gamma-poisson needs alpha > 0 and rate > 0, got alpha={} rate={}",
            alpha, rate
        )));
    }
    Ok(ln_gamma(k + alpha) - ln_gamma(alpha) - ln_gamma(k + 1.0) + alpha * (rate / (1.0 + rate)).ln()
        - k * (1.0 + rate).ln())
}

/// Gamma-Poisson (negative binomial) distribution.
#[derive(Debug, Clone)]
pub struct GammaPoisson {
    concentration: Tensor,
    rate: Tensor,
    batch_shape: Vec<usize>,
}

impl GammaPoisson {
    /// `concentration`/`rate` parameterize the Gamma prior on the Poisson rate.
    pub fn new(concentration: Tensor, rate: Tensor) -> Result<Self> {
        check_param("concentration", &Constraint::Positive, &concentration)?;
        check_param("rate", &Constraint::Positive, &rate)?;
        let batch_shape = params_shape(&[&concentration, &rate])?;
        Ok(Self { concentration, rate, batch_shape })
    }
}

impl Distribution for GammaPoisson {
    fn name(&self) -> &'static str {
        "GammaPoisson"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::nonnegative_integer()
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration", Constraint::Positive), ("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.concentration, &self.rate], |rng, p| {
            let lambda = crate::gamma::draw(rng, p[0], p[1])?;
            crate::poisson::draw(rng, lambda)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.concentration, &self.rate, gamma_poisson_logpmf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.concentration, &self.rate, |a, r| Ok(a / r))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.concentration, &self.rate, |a, r| Ok(a / (r * r) * (1.0 + r)))
    }
}
