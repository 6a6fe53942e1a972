//! Continuous uniform and Pareto distributions.

use pp_core::tensor::{try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;

use crate::constraints::Constraint;
use crate::distribution::{check_param, params_shape, sample_elementwise, validate_value, Distribution};

/// `Uniform(low, high)`.
#[derive(Debug, Clone)]
pub struct Uniform {
    low: Tensor,
    high: Tensor,
    batch_shape: Vec<usize>,
}

impl Uniform {
    /// Requires `low < high` elementwise.
    pub fn new(low: Tensor, high: Tensor) -> Result<Self> {
        check_param("low", &Constraint::Real, &low)?;
        check_param("high", &Constraint::GreaterThan(low.clone()), &high)?;
        let batch_shape = params_shape(&[&low, &high])?;
        Ok(Self { low, high, batch_shape })
    }
}

impl Distribution for Uniform {
    fn name(&self) -> &'static str {
        "Uniform"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Interval(self.low.clone(), self.high.clone())
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("low", Constraint::Real), ("high", Constraint::Dependent)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.low, &self.high], |rng, p| {
            let u: f64 = rng.random_range(0.0..1.0);
            Ok(p[0] + u * (p[1] - p[0]))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.low, &self.high, |_, lo, hi| Ok(-(hi - lo).ln()))
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.low, &self.high, |lo, hi| Ok(0.5 * (lo + hi)))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.low, &self.high, |lo, hi| Ok((hi - lo).powi(2) / 12.0))
    }
}

/// Log-PDF of `Pareto(scale, alpha)` at `x`.
pub fn pareto_logpdf(x: f64, scale: f64, alpha: f64) -> Result<f64> {
    if !(scale > 0.0 && alpha > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "pareto needs scale > 0 and alpha > 0, got scale={} alpha={}",
            scale, alpha
        )));
    }
    if x < scale {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(alpha.ln() + alpha * scale.ln() - (alpha + 1.0) * x.ln())
}

/// `Pareto(scale, alpha)`: power-law tail above `scale`.
#[derive(Debug, Clone)]
pub struct Pareto {
    scale: Tensor,
    alpha: Tensor,
    batch_shape: Vec<usize>,
}

impl Pareto {
    /// Create a batched Pareto.
    pub fn new(scale: Tensor, alpha: Tensor) -> Result<Self> {
        check_param("scale", &Constraint::Positive, &scale)?;
        check_param("alpha", &Constraint::Positive, &alpha)?;
        let batch_shape = params_shape(&[&scale, &alpha])?;
        Ok(Self { scale, alpha, batch_shape })
    }
}

impl Distribution for Pareto {
    fn name(&self) -> &'static str {
        "Pareto"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::GreaterThan(self.scale.clone())
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("scale", Constraint::Positive), ("alpha", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.scale, &self.alpha], |rng, p| {
            // u in (0, 1) keeps the draw strictly above `scale`
            let u: f64 = rng.random_range(f64::EPSILON..1.0 - f64::EPSILON);
            Ok(p[0] * u.powf(-1.0 / p[1]))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.scale, &self.alpha, pareto_logpdf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.scale, &self.alpha, |s, a| Ok(if a > 1.0 { a * s / (a - 1.0) } else { f64::INFINITY }))
    }
}
