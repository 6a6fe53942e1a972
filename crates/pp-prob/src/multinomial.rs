//! Multinomial distribution over count vectors.

use pp_core::tensor::{broadcast_shapes, extended_shape, from_vec};
use pp_core::{Error, PrngKey, Result, Tensor};
use statrs::function::gamma::ln_gamma;

use crate::categorical::Categorical;
use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, sample_events, validate_value, Distribution};

/// Log-PMF of `Multinomial(n, p)` at the count vector `x`, `p` given as log-probabilities.
pub fn logpmf(x: &[f64], log_p: &[f64]) -> f64 {
    let n: f64 = x.iter().sum();
    x.iter().zip(log_p).fold(ln_gamma(n + 1.0), |acc, (&xi, &lp)| {
        let term = if xi == 0.0 { 0.0 } else { xi * lp };
        acc - ln_gamma(xi + 1.0) + term
    })
}

/// `Multinomial(total_count, p)`; categories along the last dim.
#[derive(Debug, Clone)]
pub struct Multinomial {
    total_count: Tensor,
    categorical: Categorical,
    from_logits: bool,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl Multinomial {
    /// Parameterize by probabilities on the simplex.
    pub fn from_probs(total_count: Tensor, probs: Tensor) -> Result<Self> {
        Self::build(total_count, Categorical::from_probs(probs)?, false)
    }

    /// Parameterize by unnormalized log-probabilities.
    pub fn from_logits(total_count: Tensor, logits: Tensor) -> Result<Self> {
        Self::build(total_count, Categorical::from_logits(logits)?, true)
    }

    fn build(total_count: Tensor, categorical: Categorical, from_logits: bool) -> Result<Self> {
        check_param("total_count", &Constraint::nonnegative_integer(), &total_count)?;
        let batch_shape = broadcast_shapes(total_count.shape(), categorical.batch_shape())
            .map_err(|e| Error::InvalidParameter(format!("total_count and probs do not broadcast: {}", e)))?;
        let event_shape = vec![categorical.num_categories()];
        Ok(Self { total_count, categorical, from_logits, batch_shape, event_shape })
    }

    /// Normalized probabilities.
    pub fn probs(&self) -> Tensor {
        self.categorical.probs()
    }
}

impl Distribution for Multinomial {
    fn name(&self) -> &'static str {
        "Multinomial"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::Multinomial(self.total_count.clone())
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        let p = if self.from_logits {
            ("logits", Constraint::RealVector)
        } else {
            ("probs", Constraint::Simplex)
        };
        vec![("total_count", Constraint::nonnegative_integer()), p]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let probs = batch_rows(&self.probs(), &self.batch_shape, 1)?;
        let counts = batch_rows(&self.total_count, &self.batch_shape, 0)?;
        let n_rows = probs.len();
        sample_events(key, &extended_shape(sample_shape, &self.batch_shape, &[]), &self.event_shape, |rng, i| {
            let p = &probs[i % n_rows];
            let mut left = counts[i % n_rows][0];
            let mut mass = 1.0;
            let mut out = Vec::with_capacity(p.len());
            for (j, &pj) in p.iter().enumerate() {
                let x = if j + 1 == p.len() {
                    left
                } else if mass <= 0.0 {
                    0.0
                } else {
                    crate::binomial::draw(rng, left, (pj / mass).clamp(0.0, 1.0))?
                };
                out.push(x);
                left -= x;
                mass -= pj;
            }
            Ok(out)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let xs = batch_rows(value, &batch, 1)?;
        let lps = batch_rows(self.categorical.log_probs(), &batch, 1)?;
        let data = xs.iter().zip(&lps).map(|(x, lp)| logpmf(x, lp)).collect();
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        let probs = batch_rows(&self.probs(), &self.batch_shape, 1)?;
        let counts = batch_rows(&self.total_count, &self.batch_shape, 0)?;
        let data = probs.iter().zip(&counts).flat_map(|(p, n)| p.iter().map(move |pi| pi * n[0])).collect();
        from_vec(&self.shape(&[]), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_two_category_reduces_to_binomial() {
        let d = Multinomial::from_probs(scalar(5.0), vector(&[0.3, 0.7])).unwrap();
        let lp = as_scalar(&d.log_prob(&vector(&[2.0, 3.0])).unwrap()).unwrap();
        assert_relative_eq!(lp, crate::binomial::logpmf(2.0, 5.0, 0.3).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_samples_sum_to_total() {
        let d = Multinomial::from_logits(vector(&[4.0, 9.0]), vector(&[0.0, 1.0, -1.0])).unwrap();
        let x = d.sample(PrngKey::new(3), &[25]).unwrap();
        assert_eq!(x.shape(), &[25, 2, 3]);
        assert!(d.support().check_all(&x).unwrap());
        assert!(d.log_prob(&x).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rejects_wrong_total() {
        let d = Multinomial::from_probs(scalar(3.0), vector(&[0.5, 0.5])).unwrap();
        assert!(matches!(d.log_prob(&vector(&[1.0, 1.0])), Err(Error::ConstraintViolation(_))));
        assert!(matches!(d.log_prob(&scalar(3.0)), Err(Error::ShapeMismatch(_))));
    }
}
