//! Push-forward of a base distribution through a chain of transforms.

use std::sync::Arc;

use pp_core::tensor::{sum_rightmost, try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};

use crate::constraints::Constraint;
use crate::distribution::{validate_value, DistRef, Distribution};
use crate::normal::Normal;
use crate::transforms::{ExpTransform, TransformRef};

/// Distribution of `y = t_n(...t_1(x))` with `x ~ base`.
///
/// `log_prob(y) = base.log_prob(x) - Σ log|J_i|`, with each Jacobian
/// term reduced over the event dims it spans.
#[derive(Debug, Clone)]
pub struct TransformedDistribution {
    base: DistRef,
    transforms: Vec<TransformRef>,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl TransformedDistribution {
    /// Apply `transforms` in order to draws of `base`.
    pub fn new(base: DistRef, transforms: Vec<TransformRef>) -> Result<Self> {
        let mut shape = base.shape(&[]);
        let mut event_dim = base.event_dim();
        for t in &transforms {
            shape = t.forward_shape(&shape)?;
            event_dim = t.codomain_event_dim() + event_dim.saturating_sub(t.domain_event_dim());
        }
        if event_dim > shape.len() {
            return Err(Error::ShapeMismatch(format!(
                "transforms need {} event dims but the base only has shape {:?}",
                event_dim, shape
            )));
        }
        let (batch, event) = shape.split_at(shape.len() - event_dim);
        Ok(Self { base, transforms, batch_shape: batch.to_vec(), event_shape: event.to_vec() })
    }

    /// Base distribution.
    pub fn base(&self) -> &DistRef {
        &self.base
    }

    /// Transforms, in application order.
    pub fn transforms(&self) -> &[TransformRef] {
        &self.transforms
    }
}

impl Distribution for TransformedDistribution {
    fn name(&self) -> &'static str {
        "TransformedDistribution"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        match self.transforms.last() {
            Some(t) => t.codomain(),
            None => self.base.support(),
        }
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        self.base.arg_constraints()
    }
    fn is_discrete(&self) -> bool {
        self.base.is_discrete()
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let x = self.base.sample(key, sample_shape)?;
        self.transforms.iter().try_fold(x, |acc, t| t.forward(&acc))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        let mut event_dim = self.event_shape.len();
        let mut y = value.clone();
        let mut log_det: Option<Tensor> = None;
        for t in self.transforms.iter().rev() {
            let x = t.inverse(&y)?;
            event_dim = (event_dim + t.domain_event_dim()).saturating_sub(t.codomain_event_dim());
            let ladj = t.log_abs_det_jacobian(&x, &y)?;
            let ladj = sum_rightmost(&ladj, event_dim.saturating_sub(t.domain_event_dim()).min(ladj.ndim()))?;
            log_det = Some(match log_det {
                None => ladj,
                Some(acc) => &acc + &ladj,
            });
            y = x;
        }
        let base_lp = self.base.log_prob(&y)?;
        let base_lp = sum_rightmost(&base_lp, event_dim.saturating_sub(self.base.event_dim()))?;
        Ok(match log_det {
            Some(ld) => &base_lp - &ld,
            None => base_lp,
        })
    }
}

/// Log-PDF of `LogNormal(loc, scale)` at `x`.
pub fn lognormal_logpdf(x: f64, loc: f64, scale: f64) -> Result<f64> {
    if x <= 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(crate::normal::logpdf(x.ln(), loc, scale)? - x.ln())
}

/// `exp(Normal(loc, scale))`.
#[derive(Debug, Clone)]
pub struct LogNormal {
    loc: Tensor,
    scale: Tensor,
    inner: TransformedDistribution,
}

impl LogNormal {
    /// Create a batched log-normal.
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        let base: DistRef = Arc::new(Normal::new(loc.clone(), scale.clone())?);
        let inner = TransformedDistribution::new(base, vec![Arc::new(ExpTransform::default())])?;
        Ok(Self { loc, scale, inner })
    }
}

impl Distribution for LogNormal {
    fn name(&self) -> &'static str {
        "LogNormal"
    }
    fn batch_shape(&self) -> &[usize] {
        self.inner.batch_shape()
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Positive
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("loc", Constraint::Real), ("scale", Constraint::Positive)]
    }
    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        self.inner.sample(key, sample_shape)
    }
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        self.inner.log_prob(value)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.loc, &self.scale, |m, s| Ok((m + 0.5 * s * s).exp()))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.loc, &self.scale, |m, s| {
            let s2 = s * s;
            Ok(s2.exp_m1() * (2.0 * m + s2).exp())
        })
    }
}

/// Elementwise closed-form log-normal density, for callers holding raw tensors.
pub fn lognormal_log_prob(x: &Tensor, loc: &Tensor, scale: &Tensor) -> Result<Tensor> {
    try_map3(x, loc, scale, lognormal_logpdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::{AffineTransform, StickBreakingTransform};
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_lognormal_matches_closed_form() {
        let d = LogNormal::new(vector(&[0.0, 0.5]), scalar(0.8)).unwrap();
        let x = vector(&[1.7, 0.4]);
        let lp = d.log_prob(&x).unwrap();
        let expected = lognormal_log_prob(&x, &vector(&[0.0, 0.5]), &scalar(0.8)).unwrap();
        for (a, b) in lp.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        assert!(matches!(d.log_prob(&vector(&[-1.0, 1.0])), Err(Error::ConstraintViolation(_))));
    }

    #[test]
    fn test_affine_push_forward_is_normal() {
        let base: DistRef = Arc::new(Normal::new(scalar(0.0), scalar(1.0)).unwrap());
        let affine = AffineTransform::new(scalar(3.0), scalar(2.0), Constraint::Real).unwrap();
        let d = TransformedDistribution::new(base, vec![Arc::new(affine)]).unwrap();
        let lp = as_scalar(&d.log_prob(&scalar(4.0)).unwrap()).unwrap();
        assert_relative_eq!(lp, crate::normal::logpdf(4.0, 3.0, 2.0).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_stick_breaking_push_forward_shapes() {
        let base: DistRef = Arc::new(
            crate::independent::Independent::new(
                Arc::new(Normal::new(vector(&[0.0, 0.0]), scalar(1.0)).unwrap()),
                1,
            )
            .unwrap(),
        );
        let d = TransformedDistribution::new(base, vec![Arc::new(StickBreakingTransform::default())]).unwrap();
        assert_eq!(d.event_shape(), &[3]);
        let y = d.sample(PrngKey::new(2), &[5]).unwrap();
        assert_eq!(y.shape(), &[5, 3]);
        let lp = d.log_prob(&y).unwrap();
        assert_eq!(lp.shape(), &[5]);
        assert!(lp.iter().all(|v| v.is_finite()));
    }
}
