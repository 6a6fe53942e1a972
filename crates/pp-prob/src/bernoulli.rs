//! Bernoulli distribution.

use pp_core::tensor::{try_map1, try_map2};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;

use crate::constraints::Constraint;
use crate::distribution::{check_param, enumerate_values, sample_elementwise, validate_value, Distribution};
use crate::math::{log_sigmoid, logit, sigmoid};

/// Log-PMF of a Bernoulli distribution at `k ∈ {0, 1}` with success probability `p`.
pub fn logpmf(k: f64, p: f64) -> Result<f64> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidParameter(format!("p must be finite and in [0,1], got {}", p)));
    }
    if k == 0.0 {
        Ok((1.0 - p).ln())
    } else if k == 1.0 {
        Ok(p.ln())
    } else {
        Err(Error::ConstraintViolation(format!("k must be 0 or 1, got {}", k)))
    }
}

/// Log-PMF with the success probability given in logit space.
pub fn logpmf_logit(k: f64, logit_p: f64) -> Result<f64> {
    if logit_p.is_nan() {
        return Err(Error::InvalidParameter("logit_p must not be NaN".into()));
    }
    if k == 0.0 {
        Ok(log_sigmoid(-logit_p))
    } else if k == 1.0 {
        Ok(log_sigmoid(logit_p))
    } else {
        Err(Error::ConstraintViolation(format!("k must be 0 or 1, got {}", k)))
    }
}

/// Negative log-likelihood of a Bernoulli distribution at `k`.
pub fn nll(k: f64, p: f64) -> Result<f64> {
    Ok(-logpmf(k, p)?)
}

/// `Bernoulli(p)` over `{0, 1}`.
///
/// Built either from probabilities or from logits; `log_prob` uses the
/// representation it was constructed with.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    probs: Tensor,
    logits: Option<Tensor>,
}

impl Bernoulli {
    /// Parameterize by success probability.
    pub fn from_probs(probs: Tensor) -> Result<Self> {
        check_param("probs", &Constraint::UnitInterval, &probs)?;
        Ok(Self { probs, logits: None })
    }

    /// Parameterize by log-odds.
    pub fn from_logits(logits: Tensor) -> Result<Self> {
        check_param("logits", &Constraint::Real, &logits)?;
        let probs = logits.mapv(sigmoid);
        Ok(Self { probs, logits: Some(logits) })
    }

    /// Success probabilities.
    pub fn probs(&self) -> &Tensor {
        &self.probs
    }

    /// Log-odds, derived from `probs` when built from probabilities.
    pub fn logits(&self) -> Tensor {
        match &self.logits {
            Some(l) => l.clone(),
            None => self.probs.mapv(logit),
        }
    }
}

impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        "Bernoulli"
    }
    fn batch_shape(&self) -> &[usize] {
        self.probs.shape()
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Boolean
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        match self.logits {
            Some(_) => vec![("logits", Constraint::Real)],
            None => vec![("probs", Constraint::UnitInterval)],
        }
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.probs], |rng, p| {
            let u: f64 = rng.random_range(0.0..1.0);
            Ok(if u < p[0] { 1.0 } else { 0.0 })
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        match &self.logits {
            Some(l) => try_map2(value, l, logpmf_logit),
            None => try_map2(value, &self.probs, logpmf),
        }
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.probs.clone())
    }

    fn variance(&self) -> Result<Tensor> {
        try_map1(&self.probs, |p| Ok(p * (1.0 - p)))
    }

    fn has_enumerate_support(&self) -> bool {
        true
    }

    fn enumerate_support(&self, expand: bool) -> Result<Tensor> {
        enumerate_values(&[0.0, 1.0], self.batch_shape(), expand)
    }
}
