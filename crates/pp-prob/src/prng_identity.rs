//! Distribution whose samples are fresh PRNG keys.

use pp_core::tensor::{extended_shape, from_vec, numel};
use pp_core::{PrngKey, Result, Tensor};

use crate::constraints::Constraint;
use crate::distribution::{validate_value, Distribution};

/// Samples are child keys of the sampling key encoded as `[2]` tensors.
///
/// The density is flat, so a site with this distribution only threads
/// randomness through a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrngIdentity;

impl PrngIdentity {
    /// New key distribution.
    pub fn new() -> Self {
        Self
    }
}

impl Distribution for PrngIdentity {
    fn name(&self) -> &'static str {
        "PrngIdentity"
    }
    fn batch_shape(&self) -> &[usize] {
        &[]
    }
    fn event_shape(&self) -> &[usize] {
        &[2]
    }
    fn support(&self) -> Constraint {
        Constraint::Real
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let n = numel(sample_shape);
        let keys = key.split_tensor(n)?;
        from_vec(&extended_shape(sample_shape, &[], &[2]), keys.iter().copied().collect())
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        Ok(Tensor::zeros(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_decode_to_distinct_keys() {
        let d = PrngIdentity::new();
        let x = d.sample(PrngKey::new(9), &[3]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        let a = PrngKey::from_tensor(&x.index_axis(ndarray::Axis(0), 0).to_owned()).unwrap();
        let b = PrngKey::from_tensor(&x.index_axis(ndarray::Axis(0), 1).to_owned()).unwrap();
        assert_ne!(a, b);
        assert_eq!(d.log_prob(&x).unwrap().shape(), &[3]);
    }
}
