//! Gamma family: `Gamma`, `Chi2`, `InverseGamma`.

use pp_core::tensor::{try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{check_param, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::{require_positive, xlogy};

/// Log-PDF of a Gamma distribution with `shape` and `rate` at `x`.
///
/// Parameterization:
/// - `shape > 0`
/// - `rate > 0` (inverse scale)
/// Support: `x >= 0`.
pub fn logpdf_shape_rate(x: f64, shape: f64, rate: f64) -> Result<f64> {
    let shape = require_positive("shape", shape)?;
    let rate = require_positive("rate", rate)?;
    if x < 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(shape * rate.ln() - ln_gamma(shape) + xlogy(shape - 1.0, x) - rate * x)
}

/// Draw from `Gamma(shape, rate)`.
pub(crate) fn draw<R: rand::Rng + ?Sized>(rng: &mut R, shape: f64, rate: f64) -> Result<f64> {
    let g = rand_distr::Gamma::new(shape, 1.0 / rate)
        .map_err(|e| Error::InvalidParameter(format!("gamma: {}", e)))?;
    // Tiny shapes can underflow to exactly zero, which sits outside `positive`.
    Ok(g.sample(rng).max(f64::MIN_POSITIVE))
}

/// `Gamma(concentration, rate)`.
#[derive(Debug, Clone)]
pub struct Gamma {
    concentration: Tensor,
    rate: Tensor,
    batch_shape: Vec<usize>,
}

impl Gamma {
    /// Create a batched Gamma.
    pub fn new(concentration: Tensor, rate: Tensor) -> Result<Self> {
        check_param("concentration", &Constraint::Positive, &concentration)?;
        check_param("rate", &Constraint::Positive, &rate)?;
        let batch_shape = params_shape(&[&concentration, &rate])?;
        Ok(Self { concentration, rate, batch_shape })
    }

    /// Shape parameter.
    pub fn concentration(&self) -> &Tensor {
        &self.concentration
    }

    /// Inverse scale.
    pub fn rate(&self) -> &Tensor {
        &self.rate
    }
}

impl Distribution for Gamma {
    fn name(&self) -> &'static str {
        "Gamma"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Positive
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration", Constraint::Positive), ("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.concentration, &self.rate], |rng, p| {
            draw(rng, p[0], p[1])
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.concentration, &self.rate, logpdf_shape_rate)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.concentration, &self.rate, |a, b| Ok(a / b))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.concentration, &self.rate, |a, b| Ok(a / (b * b)))
    }
}

/// `Chi2(df) = Gamma(df / 2, 1 / 2)`.
#[derive(Debug, Clone)]
pub struct Chi2 {
    df: Tensor,
    inner: Gamma,
}

impl Chi2 {
    /// Chi-squared with `df` degrees of freedom.
    pub fn new(df: Tensor) -> Result<Self> {
        check_param("df", &Constraint::Positive, &df)?;
        let inner = Gamma::new(df.mapv(|d| 0.5 * d), pp_core::tensor::scalar(0.5))?;
        Ok(Self { df, inner })
    }

    /// Degrees of freedom.
    pub fn df(&self) -> &Tensor {
        &self.df
    }
}

impl Distribution for Chi2 {
    fn name(&self) -> &'static str {
        "Chi2"
    }
    fn batch_shape(&self) -> &[usize] {
        self.inner.batch_shape()
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Positive
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("df", Constraint::Positive)]
    }
    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        self.inner.sample(key, sample_shape)
    }
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        self.inner.log_prob(value)
    }
    fn mean(&self) -> Result<Tensor> {
        self.inner.mean()
    }
    fn variance(&self) -> Result<Tensor> {
        self.inner.variance()
    }
}

/// `1 / X` for `X ~ Gamma(concentration, rate)`.
#[derive(Debug, Clone)]
pub struct InverseGamma {
    concentration: Tensor,
    rate: Tensor,
    batch_shape: Vec<usize>,
}

impl InverseGamma {
    /// `rate` is the scale of the inverse-gamma (the rate of the underlying Gamma).
    pub fn new(concentration: Tensor, rate: Tensor) -> Result<Self> {
        check_param("concentration", &Constraint::Positive, &concentration)?;
        check_param("rate", &Constraint::Positive, &rate)?;
        let batch_shape = params_shape(&[&concentration, &rate])?;
        Ok(Self { concentration, rate, batch_shape })
    }
}

impl Distribution for InverseGamma {
    fn name(&self) -> &'static str {
        "InverseGamma"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Positive
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration", Constraint::Positive), ("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.concentration, &self.rate], |rng, p| {
            Ok(1.0 / draw(rng, p[0], p[1])?)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        // p(x) = Gamma(1/x) / x^2
        try_map3(value, &self.concentration, &self.rate, |x, a, b| {
            Ok(logpdf_shape_rate(1.0 / x, a, b)? - 2.0 * x.ln())
        })
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.concentration, &self.rate, |a, b| Ok(if a > 1.0 { b / (a - 1.0) } else { f64::INFINITY }))
    }
}
