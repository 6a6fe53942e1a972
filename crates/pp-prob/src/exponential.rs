//! Exponential distribution.

use pp_core::tensor::{try_map1, try_map2};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;

use crate::constraints::Constraint;
use crate::distribution::{check_param, sample_elementwise, validate_value, Distribution};

/// Log-PDF of an Exponential distribution at `x` with rate `rate`.
///
/// Support: `x >= 0`.
pub fn logpdf(x: f64, rate: f64) -> Result<f64> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidParameter(format!("rate must be finite and > 0, got {}", rate)));
    }
    if x < 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(rate.ln() - rate * x)
}

/// `Exponential(rate)`.
#[derive(Debug, Clone)]
pub struct Exponential {
    rate: Tensor,
    batch_shape: Vec<usize>,
}

impl Exponential {
    /// Create a batched Exponential.
    pub fn new(rate: Tensor) -> Result<Self> {
        check_param("rate", &Constraint::Positive, &rate)?;
        let batch_shape = rate.shape().to_vec();
        Ok(Self { rate, batch_shape })
    }
}

impl Distribution for Exponential {
    fn name(&self) -> &'static str {
        "Exponential"
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
        vec![("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.rate], |rng, p| {
            let e = rand_distr::Exp::new(p[0]).map_err(|e| Error::InvalidParameter(format!("exponential: {}", e)))?;
            Ok(e.sample(rng).max(f64::MIN_POSITIVE))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map2(value, &self.rate, logpdf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map1(&self.rate, |r| Ok(1.0 / r))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map1(&self.rate, |r| Ok(1.0 / (r * r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_core::tensor::scalar;

    #[test]
    fn test_basic_value() {
        let lp = logpdf(0.5, 2.0).unwrap();
        assert!((lp - (2.0f64.ln() - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_support() {
        let lp = logpdf(-0.1, 2.0).unwrap();
        assert!(lp.is_infinite() && lp.is_sign_negative());
        let d = Exponential::new(scalar(2.0)).unwrap();
        assert!(matches!(d.log_prob(&scalar(-0.1)), Err(Error::ConstraintViolation(_))));
    }

    #[test]
    fn test_invalid_rate() {
        assert!(logpdf(0.0, 0.0).is_err());
        assert!(logpdf(0.0, -1.0).is_err());
        assert!(Exponential::new(scalar(0.0)).is_err());
    }
}
