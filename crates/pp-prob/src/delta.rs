//! Point masses: `Delta` and the empty-event `Unit`.

use pp_core::tensor::{extended_shape, from_vec};
use pp_core::{Error, PrngKey, Result, Tensor};

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, expand, params_shape, validate_value, Distribution};

/// Point mass at `v` carrying an extra `log_density`.
///
/// The rightmost `event_dim` dims of `v` form one event. `log_prob` is
/// `log_density` where the value matches `v` exactly and `-inf` elsewhere.
#[derive(Debug, Clone)]
pub struct Delta {
    v: Tensor,
    log_density: Tensor,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl Delta {
    /// Point mass with zero extra log-density.
    pub fn new(v: Tensor, event_dim: usize) -> Result<Self> {
        Self::with_log_density(v, Tensor::zeros(ndarray::IxDyn(&[])), event_dim)
    }

    /// Point mass at `v` weighted by `log_density` (broadcast over the batch).
    pub fn with_log_density(v: Tensor, log_density: Tensor, event_dim: usize) -> Result<Self> {
        if event_dim > v.ndim() {
            return Err(Error::InvalidParameter(format!(
                "event_dim {} exceeds the {} dims of v",
                event_dim,
                v.ndim()
            )));
        }
        let split = v.ndim() - event_dim;
        let (batch, event) = v.shape().split_at(split);
        let batch_shape = batch.to_vec();
        let event_shape = event.to_vec();
        let full = params_shape(&[&Tensor::zeros(ndarray::IxDyn(&batch_shape)), &log_density])?;
        if full != batch_shape {
            return Err(Error::InvalidParameter(format!(
                "log_density of shape {:?} does not fit batch shape {:?}",
                log_density.shape(),
                batch_shape
            )));
        }
        Ok(Self { v, log_density, batch_shape, event_shape })
    }

    /// Location of the mass.
    pub fn v(&self) -> &Tensor {
        &self.v
    }
}

impl Distribution for Delta {
    fn name(&self) -> &'static str {
        "Delta"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::Dependent
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("v", Constraint::Dependent), ("log_density", Constraint::Real)]
    }
    fn is_discrete(&self) -> bool {
        true
    }

    fn sample(&self, _key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        expand(&self.v, &self.shape(sample_shape))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let event_dim = self.event_shape.len();
        let xs = batch_rows(value, &batch, event_dim)?;
        let vs = batch_rows(&self.v, &batch, event_dim)?;
        let lds = batch_rows(&self.log_density, &batch, 0)?;
        let data = xs
            .iter()
            .zip(&vs)
            .zip(&lds)
            .map(|((x, v), ld)| if x == v { ld[0] } else { f64::NEG_INFINITY })
            .collect();
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.v.clone())
    }

    fn variance(&self) -> Result<Tensor> {
        Ok(Tensor::zeros(self.v.raw_dim()))
    }
}

/// Distribution over the empty event that only contributes `log_factor`.
#[derive(Debug, Clone)]
pub struct Unit {
    log_factor: Tensor,
    event_shape: Vec<usize>,
}

impl Unit {
    /// The batch shape is the shape of `log_factor`.
    pub fn new(log_factor: Tensor) -> Self {
        Self { log_factor, event_shape: vec![0] }
    }

    /// Carried log factor.
    pub fn log_factor(&self) -> &Tensor {
        &self.log_factor
    }
}

impl Distribution for Unit {
    fn name(&self) -> &'static str {
        "Unit"
    }
    fn batch_shape(&self) -> &[usize] {
        self.log_factor.shape()
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::Real
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("log_factor", Constraint::Real)]
    }

    fn sample(&self, _key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        from_vec(&extended_shape(sample_shape, self.batch_shape(), &self.event_shape), Vec::new())
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        expand(&self.log_factor, &batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_delta_mass_at_v() {
        let d = Delta::with_log_density(vector(&[1.0, 2.0]), scalar(-0.5), 1).unwrap();
        assert!(d.batch_shape().is_empty());
        assert_eq!(as_scalar(&d.log_prob(&vector(&[1.0, 2.0])).unwrap()).unwrap(), -0.5);
        assert_eq!(as_scalar(&d.log_prob(&vector(&[1.0, 2.5])).unwrap()).unwrap(), f64::NEG_INFINITY);
        assert!(d.is_discrete());
        assert_eq!(d.sample(PrngKey::new(0), &[3]).unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn test_delta_rejects_large_event_dim() {
        assert!(matches!(Delta::new(scalar(1.0), 1), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_unit_carries_factor() {
        let u = Unit::new(vector(&[0.5, -1.0]));
        let x = u.sample(PrngKey::new(0), &[]).unwrap();
        assert_eq!(x.shape(), &[2, 0]);
        let lp = u.log_prob(&x).unwrap();
        assert_eq!(lp.iter().copied().collect::<Vec<_>>(), vec![0.5, -1.0]);
    }
}
