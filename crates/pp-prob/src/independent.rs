//! Reinterpret rightmost batch dims of a distribution as event dims.

use std::sync::Arc;

use pp_core::tensor::sum_rightmost;
use pp_core::{Error, PrngKey, Result, Tensor};

use crate::constraints::Constraint;
use crate::distribution::{validate_value, DistRef, Distribution};

/// `Independent(base, n)`: the `n` rightmost batch dims of `base` join the event.
///
/// `log_prob` sums the base log-density over those dims.
#[derive(Debug, Clone)]
pub struct Independent {
    base: DistRef,
    reinterpreted_batch_ndims: usize,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl Independent {
    /// Wrap `base`; `n` must not exceed its batch rank.
    pub fn new(base: DistRef, reinterpreted_batch_ndims: usize) -> Result<Self> {
        let batch = base.batch_shape();
        if reinterpreted_batch_ndims > batch.len() {
            return Err(Error::ShapeMismatch(format!(
                "cannot reinterpret {} batch dims of a {} with batch shape {:?}",
                reinterpreted_batch_ndims,
                base.name(),
                batch
            )));
        }
        let split = batch.len() - reinterpreted_batch_ndims;
        let batch_shape = batch[..split].to_vec();
        let mut event_shape = batch[split..].to_vec();
        event_shape.extend_from_slice(base.event_shape());
        Ok(Self { base, reinterpreted_batch_ndims, batch_shape, event_shape })
    }

    /// Wrapped distribution.
    pub fn base(&self) -> &DistRef {
        &self.base
    }

    /// Number of batch dims moved into the event.
    pub fn reinterpreted_batch_ndims(&self) -> usize {
        self.reinterpreted_batch_ndims
    }
}

/// `base.to_event(n)`: wrap `base` in [`Independent`]. `n = 0` returns it unchanged.
pub fn to_event(base: DistRef, n: usize) -> Result<DistRef> {
    if n == 0 {
        return Ok(base);
    }
    Ok(Arc::new(Independent::new(base, n)?))
}

impl Distribution for Independent {
    fn name(&self) -> &'static str {
        "Independent"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        self.base.support()
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        self.base.arg_constraints()
    }
    fn is_discrete(&self) -> bool {
        self.base.is_discrete()
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        self.base.sample(key, sample_shape)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        sum_rightmost(&self.base.log_prob(value)?, self.reinterpreted_batch_ndims)
    }

    fn mean(&self) -> Result<Tensor> {
        self.base.mean()
    }

    fn variance(&self) -> Result<Tensor> {
        self.base.variance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normal::Normal;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, from_vec, scalar, vector};

    #[test]
    fn test_sums_over_reinterpreted_dims() {
        let base: DistRef = Arc::new(Normal::new(vector(&[0.0, 1.0, 2.0]), scalar(1.0)).unwrap());
        let d = Independent::new(base.clone(), 1).unwrap();
        assert!(d.batch_shape().is_empty());
        assert_eq!(d.event_shape(), &[3]);
        let x = vector(&[0.3, 0.2, 2.5]);
        let expected: f64 = base.log_prob(&x).unwrap().sum();
        assert_relative_eq!(as_scalar(&d.log_prob(&x).unwrap()).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_partial_reinterpretation() {
        let loc = from_vec(&[2, 3], vec![0.0; 6]).unwrap();
        let base: DistRef = Arc::new(Normal::new(loc, scalar(1.0)).unwrap());
        let d = to_event(base, 1).unwrap();
        assert_eq!(d.batch_shape(), &[2]);
        let x = d.sample(PrngKey::new(1), &[4]).unwrap();
        assert_eq!(x.shape(), &[4, 2, 3]);
        assert_eq!(d.log_prob(&x).unwrap().shape(), &[4, 2]);
        assert!(matches!(d.log_prob(&vector(&[0.0, 0.0])), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_rejects_too_many_dims() {
        let base: DistRef = Arc::new(Normal::new(scalar(0.0), scalar(1.0)).unwrap());
        assert!(matches!(Independent::new(base, 1), Err(Error::ShapeMismatch(_))));
    }
}
