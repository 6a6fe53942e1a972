//! Poisson and zero-inflated Poisson distributions.

use pp_core::tensor::{try_map1, try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;
use rand_distr::Distribution as RandDistribution;
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{check_param, params_shape, sample_elementwise, validate_value, Distribution};

/// Log-PMF of `Poisson(lambda)` at count `k`.
pub fn logpmf(k: f64, lambda: f64) -> Result<f64> {
    if !lambda.is_finite() || lambda <= 0.0 {
        return Err(Error::InvalidParameter(format!("lambda must be finite and > 0, got {}", lambda)));
    }
    if k < 0.0 || k.fract() != 0.0 {
        return Err(Error::ConstraintViolation(format!("k must be a non-negative integer, got {}", k)));
    }
    Ok(k * lambda.ln() - lambda - ln_gamma(k + 1.0))
}

/// Negative log-likelihood for Poisson.
pub fn nll(k: f64, lambda: f64) -> Result<f64> {
    Ok(-logpmf(k, lambda)?)
}

pub(crate) fn draw<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> Result<f64> {
    let p = rand_distr::Poisson::new(lambda)
        .map_err(|e| Error::InvalidParameter(format!("poisson(lambda={}): {}", lambda, e)))?;
    Ok(p.sample(rng))
}

/// `Poisson(rate)`.
#[derive(Debug, Clone)]
pub struct Poisson {
    rate: Tensor,
}

impl Poisson {
    /// Create a batched Poisson.
    pub fn new(rate: Tensor) -> Result<Self> {
        check_param("rate", &Constraint::Positive, &rate)?;
        Ok(Self { rate })
    }

    /// Expected count.
    pub fn rate(&self) -> &Tensor {
        &self.rate
    }
}

impl Distribution for Poisson {
    fn name(&self) -> &'static str {
        "Poisson"
    }
    fn batch_shape(&self) -> &[usize] {
        self.rate.shape()
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::nonnegative_integer()
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.rate], |rng, p| draw(rng, p[0]))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map2(value, &self.rate, logpmf)
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.rate.clone())
    }

    fn variance(&self) -> Result<Tensor> {
        Ok(self.rate.clone())
    }
}

/// Log-PMF of the zero-inflated Poisson at `k`.
pub fn zip_logpmf(k: f64, gate: f64, rate: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&gate) {
        return Err(Error::InvalidParameter(format!("gate must be in [0,1], got {}", gate)));
    }
    let pois = logpmf(k, rate)?;
    if k == 0.0 {
        Ok((gate + (1.0 - gate) * (-rate).exp()).ln())
    } else {
        Ok((1.0 - gate).ln() + pois)
    }
}

/// Poisson mixed with a point mass at zero of weight `gate`.
#[derive(Debug, Clone)]
pub struct ZeroInflatedPoisson {
    gate: Tensor,
    rate: Tensor,
    batch_shape: Vec<usize>,
}

impl ZeroInflatedPoisson {
    /// Create a batched zero-inflated Poisson.
    pub fn new(gate: Tensor, rate: Tensor) -> Result<Self> {
        check_param("gate", &Constraint::UnitInterval, &gate)?;
        check_param("rate", &Constraint::Positive, &rate)?;
        let batch_shape = params_shape(&[&gate, &rate])?;
        Ok(Self { gate, rate, batch_shape })
    }
}

impl Distribution for ZeroInflatedPoisson {
    fn name(&self) -> &'static str {
        "ZeroInflatedPoisson"
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
        vec![("gate", Constraint::UnitInterval), ("rate", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.gate, &self.rate], |rng, p| {
            let u: f64 = rng.random_range(0.0..1.0);
            if u < p[0] {
                Ok(0.0)
            } else {
                draw(rng, p[1])
            }
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.gate, &self.rate, zip_logpmf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.gate, &self.rate, |g, r| Ok((1.0 - g) * r))
    }

    fn variance(&self) -> Result<Tensor> {
        let m = self.mean()?;
        let second = try_map2(&self.gate, &self.rate, |g, r| Ok((1.0 - g) * (r + r * r)))?;
        try_map2(&second, &m, |s, m| Ok(s - m * m))
    }
}

/// Expected zero fraction of a zero-inflated Poisson.
pub fn zip_zero_prob(gate: &Tensor, rate: &Tensor) -> Result<Tensor> {
    let pois_zero = try_map1(rate, |r| Ok((-r).exp()))?;
    try_map2(gate, &pois_zero, |g, z| Ok(g + (1.0 - g) * z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::sample_mean;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_poisson_pmf() {
        assert_relative_eq!(logpmf(0.0, 2.0).unwrap(), -2.0, epsilon = 1e-12);
        assert_relative_eq!(logpmf(3.0, 2.0).unwrap(), 3.0 * 2f64.ln() - 2.0 - 6f64.ln(), epsilon = 1e-12);
        let mass: f64 = (0..60).map(|k| logpmf(k as f64, 4.5).unwrap().exp()).sum();
        assert_relative_eq!(mass, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_poisson_rejects_fractional_counts() {
        let d = Poisson::new(scalar(1.0)).unwrap();
        assert!(matches!(d.log_prob(&scalar(1.5)), Err(Error::ConstraintViolation(_))));
        assert!(matches!(Poisson::new(scalar(-1.0)), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_zip_zero_mass() {
        let d = ZeroInflatedPoisson::new(scalar(0.3), scalar(2.0)).unwrap();
        let lp0 = as_scalar(&d.log_prob(&scalar(0.0)).unwrap()).unwrap();
        assert_relative_eq!(lp0.exp(), 0.3 + 0.7 * (-2f64).exp(), epsilon = 1e-12);
        let z = zip_zero_prob(&scalar(0.3), &scalar(2.0)).unwrap();
        assert_relative_eq!(as_scalar(&z).unwrap(), lp0.exp(), epsilon = 1e-12);
        let mass: f64 = (0..60).map(|k| zip_logpmf(k as f64, 0.3, 2.0).unwrap().exp()).sum();
        assert_relative_eq!(mass, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_sample_means() {
        let d = Poisson::new(vector(&[1.0, 7.0])).unwrap();
        let m = sample_mean(&d.sample(PrngKey::new(2), &[4000]).unwrap());
        assert_relative_eq!(m[0], 1.0, epsilon = 0.1);
        assert_relative_eq!(m[1], 7.0, epsilon = 0.25);
        let z = ZeroInflatedPoisson::new(scalar(0.5), scalar(4.0)).unwrap();
        let m = sample_mean(&z.sample(PrngKey::new(3), &[4000]).unwrap());
        assert_relative_eq!(m[0], 2.0, epsilon = 0.2);
    }
}
