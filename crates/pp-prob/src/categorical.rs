//! Categorical and ordered-logistic distributions over `{0, .., K-1}`.

use pp_core::tensor::{broadcast_shapes, extended_shape, from_vec, logsumexp, map_events};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, enumerate_values, sample_events, validate_value, Distribution};
use crate::math::sigmoid;

/// Inverse-CDF draw of a category from normalized probabilities.
pub(crate) fn draw_category<R: Rng + ?Sized>(rng: &mut R, probs: &[f64]) -> f64 {
    let u: f64 = rng.random_range(0.0..1.0);
    let mut acc = 0.0;
    for (k, p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return k as f64;
        }
    }
    // rounding left `acc` slightly below 1
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0) as f64
}

/// `Categorical(p)`: the last dim of the parameter indexes categories.
#[derive(Debug, Clone)]
pub struct Categorical {
    log_probs: Tensor,
    from_logits: bool,
    batch_shape: Vec<usize>,
}

impl Categorical {
    /// Parameterize by probabilities on the simplex.
    pub fn from_probs(probs: Tensor) -> Result<Self> {
        Self::check_rank(&probs)?;
        check_param("probs", &Constraint::Simplex, &probs)?;
        Ok(Self::build(probs.mapv(f64::ln), false))
    }

    /// Parameterize by unnormalized log-probabilities.
    pub fn from_logits(logits: Tensor) -> Result<Self> {
        Self::check_rank(&logits)?;
        check_param("logits", &Constraint::RealVector, &logits)?;
        let k = logits.shape()[logits.ndim() - 1];
        let normalized = map_events(&logits, 1, &[k], |row| {
            let lse = logsumexp(row);
            Ok(row.iter().map(|x| x - lse).collect())
        })?;
        Ok(Self::build(normalized, true))
    }

    fn check_rank(t: &Tensor) -> Result<()> {
        if t.ndim() == 0 || t.shape()[t.ndim() - 1] == 0 {
            return Err(Error::InvalidParameter(format!(
                "categorical parameters need a non-empty last dim, got shape {:?}",
                t.shape()
            )));
        }
        Ok(())
    }

    fn build(log_probs: Tensor, from_logits: bool) -> Self {
        let shape = log_probs.shape();
        let batch_shape = shape[..shape.len() - 1].to_vec();
        Self { log_probs, from_logits, batch_shape }
    }

    /// Number of categories.
    pub fn num_categories(&self) -> usize {
        self.log_probs.shape()[self.log_probs.ndim() - 1]
    }

    /// Normalized probabilities.
    pub fn probs(&self) -> Tensor {
        self.log_probs.mapv(f64::exp)
    }

    /// Normalized log-probabilities.
    pub fn log_probs(&self) -> &Tensor {
        &self.log_probs
    }
}

impl Distribution for Categorical {
    fn name(&self) -> &'static str {
        "Categorical"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::integer_interval(0.0, (self.num_categories() - 1) as f64)
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        if self.from_logits {
            vec![("logits", Constraint::RealVector)]
        } else {
            vec![("probs", Constraint::Simplex)]
        }
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let rows = batch_rows(&self.probs(), &self.batch_shape, 1)?;
        let n_rows = rows.len();
        sample_events(key, &extended_shape(sample_shape, &self.batch_shape, &[]), &[], |rng, i| {
            Ok(vec![draw_category(rng, &rows[i % n_rows])])
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let ks = batch_rows(value, &batch, 0)?;
        let rows = batch_rows(&self.log_probs, &batch, 1)?;
        let data = ks.iter().zip(&rows).map(|(k, row)| row[k[0] as usize]).collect();
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        Err(Error::NotImplemented("Categorical has no meaningful mean".into()))
    }

    fn has_enumerate_support(&self) -> bool {
        true
    }

    fn enumerate_support(&self, expand: bool) -> Result<Tensor> {
        let values: Vec<f64> = (0..self.num_categories()).map(|k| k as f64).collect();
        enumerate_values(&values, &self.batch_shape, expand)
    }
}

/// Ordinal regression likelihood.
///
/// `P(Y <= k) = sigmoid(cutpoints[k] - predictor)`; `cutpoints` must be
/// strictly increasing along its last dim.
#[derive(Debug, Clone)]
pub struct OrderedLogistic {
    predictor: Tensor,
    cutpoints: Tensor,
    categorical: Categorical,
}

impl OrderedLogistic {
    /// `predictor` is batched like the batch part of `cutpoints`.
    pub fn new(predictor: Tensor, cutpoints: Tensor) -> Result<Self> {
        check_param("predictor", &Constraint::Real, &predictor)?;
        if cutpoints.ndim() == 0 {
            return Err(Error::InvalidParameter("cutpoints must be at least 1-d".into()));
        }
        check_param("cutpoints", &Constraint::OrderedVector, &cutpoints)?;
        let cshape = cutpoints.shape();
        let batch = broadcast_shapes(predictor.shape(), &cshape[..cshape.len() - 1])
            .map_err(|e| Error::InvalidParameter(format!("predictor and cutpoints do not broadcast: {}", e)))?;
        let etas = batch_rows(&predictor, &batch, 0)?;
        let cuts = batch_rows(&cutpoints, &batch, 1)?;
        let k = cshape[cshape.len() - 1] + 1;
        let mut data = Vec::with_capacity(etas.len() * k);
        for (eta, c) in etas.iter().zip(&cuts) {
            let cdf: Vec<f64> = c.iter().map(|ck| sigmoid(ck - eta[0])).collect();
            let mut prev = 0.0;
            for &f in &cdf {
                data.push(f - prev);
                prev = f;
            }
            data.push(1.0 - prev);
        }
        let probs = from_vec(&extended_shape(&[], &batch, &[k]), data)?;
        let categorical = Categorical::from_probs(probs)?;
        Ok(Self { predictor, cutpoints, categorical })
    }

    /// Per-category probabilities.
    pub fn probs(&self) -> Tensor {
        self.categorical.probs()
    }

    /// Latent predictor.
    pub fn predictor(&self) -> &Tensor {
        &self.predictor
    }

    /// Ordered cutpoints.
    pub fn cutpoints(&self) -> &Tensor {
        &self.cutpoints
    }
}

impl Distribution for OrderedLogistic {
    fn name(&self) -> &'static str {
        "OrderedLogistic"
    }
    fn batch_shape(&self) -> &[usize] {
        self.categorical.batch_shape()
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        self.categorical.support()
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("predictor", Constraint::Real), ("cutpoints", Constraint::OrderedVector)]
    }
    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        self.categorical.sample(key, sample_shape)
    }
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        self.categorical.log_prob(value)
    }
    fn has_enumerate_support(&self) -> bool {
        true
    }
    fn enumerate_support(&self, expand: bool) -> Result<Tensor> {
        self.categorical.enumerate_support(expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::log_total_mass;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_logits_are_normalized() {
        let d = Categorical::from_logits(vector(&[1.0, 2.0, 3.0])).unwrap();
        let lp = as_scalar(&d.log_prob(&scalar(2.0)).unwrap()).unwrap();
        let z = (1f64.exp() + 2f64.exp() + 3f64.exp()).ln();
        assert_relative_eq!(lp, 3.0 - z, epsilon = 1e-12);
        for m in log_total_mass(&d) {
            assert_relative_eq!(m, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_batched_log_prob_and_support() {
        let probs = from_vec(&[2, 3], vec![0.2, 0.3, 0.5, 0.6, 0.3, 0.1]).unwrap();
        let d = Categorical::from_probs(probs).unwrap();
        let lp = d.log_prob(&vector(&[2.0, 0.0])).unwrap();
        assert_relative_eq!(lp[[0]], 0.5f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(lp[[1]], 0.6f64.ln(), epsilon = 1e-12);
        assert!(matches!(d.log_prob(&vector(&[3.0, 0.0])), Err(Error::ConstraintViolation(_))));
        assert_eq!(d.enumerate_support(false).unwrap().shape(), &[3, 1]);
    }

    #[test]
    fn test_sample_frequencies() {
        let d = Categorical::from_probs(vector(&[0.1, 0.6, 0.3])).unwrap();
        let x = d.sample(PrngKey::new(5), &[5000]).unwrap();
        let ones = x.iter().filter(|&&v| v == 1.0).count() as f64 / 5000.0;
        assert_relative_eq!(ones, 0.6, epsilon = 0.03);
    }

    #[test]
    fn test_ordered_logistic_probs() {
        let d = OrderedLogistic::new(scalar(0.5), vector(&[-1.0, 0.0, 1.5])).unwrap();
        let p: Vec<f64> = d.probs().iter().copied().collect();
        assert_eq!(p.len(), 4);
        assert_relative_eq!(p[0], sigmoid(-1.5), epsilon = 1e-12);
        assert_relative_eq!(p[3], 1.0 - sigmoid(1.0), epsilon = 1e-12);
        for m in log_total_mass(&d) {
            assert_relative_eq!(m, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ordered_logistic_rejects_unordered_cutpoints() {
        let r = OrderedLogistic::new(scalar(0.0), vector(&[1.0, 0.0]));
        assert!(matches!(r, Err(Error::InvalidParameter(_))));
    }
}
