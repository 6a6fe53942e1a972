//! Binomial distribution.

use pp_core::tensor::{try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;

use crate::constraints::Constraint;
use crate::distribution::{check_param, enumerate_values, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::{ln_choose, log_sigmoid, sigmoid};

fn check_count(k: f64, n: f64) -> Result<()> {
    if k > n {
        return Err(Error::ConstraintViolation(format!("k must be <= n, got k={} n={}", k, n)));
    }
    Ok(())
}

/// Log-PMF of a Binomial distribution `Binom(n, p)` at count `k`.
pub fn logpmf(k: f64, n: f64, p: f64) -> Result<f64> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidParameter(format!("p must be finite and in [0,1], got {}", p)));
    }
    check_count(k, n)?;

    if p == 0.0 {
        return Ok(if k == 0.0 { 0.0 } else { f64::NEG_INFINITY });
    }
    if p == 1.0 {
        return Ok(if k == n { 0.0 } else { f64::NEG_INFINITY });
    }
    Ok(ln_choose(n, k) + k * p.ln() + (n - k) * (1.0 - p).ln())
}

/// Log-PMF of a Binomial distribution with probability in logit space.
pub fn logpmf_logit(k: f64, n: f64, logit_p: f64) -> Result<f64> {
    check_count(k, n)?;
    if !logit_p.is_finite() {
        return Err(Error::InvalidParameter(format!("logit_p must be finite, got {}", logit_p)));
    }
    Ok(ln_choose(n, k) + k * log_sigmoid(logit_p) + (n - k) * log_sigmoid(-logit_p))
}

/// Negative log-likelihood for Binomial.
pub fn nll(k: f64, n: f64, p: f64) -> Result<f64> {
    Ok(-logpmf(k, n, p)?)
}

/// Draw from `Binom(n, p)` for non-negative integral `n`.
pub(crate) fn draw<R: rand::Rng + ?Sized>(rng: &mut R, n: f64, p: f64) -> Result<f64> {
    let b = rand_distr::Binomial::new(n as u64, p)
        .map_err(|e| Error::InvalidParameter(format!("binomial(n={}, p={}): {}", n, p, e)))?;
    Ok(b.sample(rng) as f64)
}

/// `Binomial(total_count, p)`.
#[derive(Debug, Clone)]
pub struct Binomial {
    total_count: Tensor,
    probs: Tensor,
    logits: Option<Tensor>,
    batch_shape: Vec<usize>,
}

impl Binomial {
    /// Parameterize by success probability.
    pub fn from_probs(total_count: Tensor, probs: Tensor) -> Result<Self> {
        check_param("total_count", &Constraint::nonnegative_integer(), &total_count)?;
        check_param("probs", &Constraint::UnitInterval, &probs)?;
        let batch_shape = params_shape(&[&total_count, &probs])?;
        Ok(Self { total_count, probs, logits: None, batch_shape })
    }

    /// Parameterize by log-odds.
    pub fn from_logits(total_count: Tensor, logits: Tensor) -> Result<Self> {
        check_param("total_count", &Constraint::nonnegative_integer(), &total_count)?;
        check_param("logits", &Constraint::Real, &logits)?;
        let batch_shape = params_shape(&[&total_count, &logits])?;
        let probs = logits.mapv(sigmoid);
        Ok(Self { total_count, probs, logits: Some(logits), batch_shape })
    }

    /// Number of trials.
    pub fn total_count(&self) -> &Tensor {
        &self.total_count
    }

    /// Single trial count shared by every batch element, if any.
    fn homogeneous_count(&self) -> Option<f64> {
        let first = *self.total_count.iter().next()?;
        self.total_count.iter().all(|&n| n == first).then_some(first)
    }
}

impl Distribution for Binomial {
    fn name(&self) -> &'static str {
        "Binomial"
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
        let p = match self.logits {
            Some(_) => ("logits", Constraint::Real),
            None => ("probs", Constraint::UnitInterval),
        };
        vec![("total_count", Constraint::nonnegative_integer()), p]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.total_count, &self.probs], |rng, p| {
            draw(rng, p[0], p[1])
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        match &self.logits {
            Some(l) => try_map3(value, &self.total_count, l, logpmf_logit),
            None => try_map3(value, &self.total_count, &self.probs, logpmf),
        }
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.total_count, &self.probs, |n, p| Ok(n * p))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.total_count, &self.probs, |n, p| Ok(n * p * (1.0 - p)))
    }

    fn has_enumerate_support(&self) -> bool {
        true
    }

    fn enumerate_support(&self, expand: bool) -> Result<Tensor> {
        let n = self.homogeneous_count().ok_or_else(|| {
            Error::NotImplemented("enumerate_support needs the same total_count across the batch".into())
        })?;
        let values: Vec<f64> = (0..=n as u64).map(|k| k as f64).collect();
        enumerate_values(&values, &self.batch_shape, expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::{log_total_mass, sample_mean};
    use approx::assert_relative_eq;
    use pp_core::tensor::{scalar, vector};

    #[test]
    fn test_logpmf_logit_matches_prob() {
        let n = 12.0;
        let logit_p: f64 = -0.7;
        let p = 1.0 / (1.0 + (-logit_p).exp());
        for k in 0..=12 {
            let a = logpmf(k as f64, n, p).unwrap();
            let b = logpmf_logit(k as f64, n, logit_p).unwrap();
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_edges_p0_p1() {
        assert_eq!(logpmf(0.0, 5.0, 0.0).unwrap(), 0.0);
        assert!(logpmf(1.0, 5.0, 0.0).unwrap().is_infinite());
        assert_eq!(logpmf(5.0, 5.0, 1.0).unwrap(), 0.0);
        assert!(logpmf(4.0, 5.0, 1.0).unwrap().is_infinite());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(logpmf(5.0, 4.0, 0.5).is_err());
        assert!(logpmf(2.0, 4.0, -0.1).is_err());
        assert!(logpmf_logit(2.0, 4.0, f64::INFINITY).is_err());
        assert!(matches!(Binomial::from_probs(scalar(2.5), scalar(0.5)), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_enumeration_and_support() {
        let d = Binomial::from_probs(scalar(6.0), vector(&[0.2, 0.7])).unwrap();
        assert_eq!(d.enumerate_support(true).unwrap().shape(), &[7, 2]);
        for m in log_total_mass(&d) {
            assert_relative_eq!(m, 0.0, epsilon = 1e-10);
        }
        assert!(matches!(d.log_prob(&scalar(7.0)), Err(Error::ConstraintViolation(_))));

        let mixed = Binomial::from_probs(vector(&[3.0, 4.0]), scalar(0.5)).unwrap();
        assert!(matches!(mixed.enumerate_support(true), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_sample_mean() {
        let d = Binomial::from_logits(scalar(10.0), scalar(0.0)).unwrap();
        let x = d.sample(PrngKey::new(4), &[4000]).unwrap();
        assert_relative_eq!(sample_mean(&x)[0], 5.0, epsilon = 0.15);
    }
}
