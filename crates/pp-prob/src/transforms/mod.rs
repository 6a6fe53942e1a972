//! Bijective transforms for unconstrained parameterization.
//!
//! Gradient-based inference operates in unconstrained space `x ∈ R^n`. A
//! [`Transform`] maps unconstrained `x` to a constrained `y = forward(x)` and
//! reports `log|det dy/dx|`, the term needed for correct densities under a
//! change of variables.
//!
//! Shapes: a transform consumes the rightmost `domain_event_dim` dims of `x`
//! as one event; `log_abs_det_jacobian` returns one value per batch element
//! (the remaining leading dims).

use std::fmt;
use std::sync::Arc;

use pp_core::tensor::sum_rightmost;
use pp_core::{Error, Result, Tensor};

use crate::constraints::Constraint;

mod elementwise;
mod matrix;
mod simplex;

pub use elementwise::{
    AffineTransform, Bijector, Elementwise, ExpBijector, ExpTransform, IdentityBijector,
    IdentityTransform, SigmoidBijector, SigmoidTransform, SoftplusBijector, SoftplusTransform,
};
pub use matrix::{CholeskyProductTransform, CorrCholeskyTransform, LowerCholeskyTransform};
pub use simplex::{OrderedTransform, StickBreakingTransform};

/// Shared handle to a transform.
pub type TransformRef = Arc<dyn Transform>;

/// A bijection between an unconstrained domain and a constrained codomain.
pub trait Transform: Send + Sync + fmt::Debug {
    /// Constraint on inputs.
    fn domain(&self) -> Constraint;

    /// Constraint on outputs.
    fn codomain(&self) -> Constraint;

    /// Event rank of inputs.
    fn domain_event_dim(&self) -> usize {
        self.domain().event_dim()
    }

    /// Event rank of outputs.
    fn codomain_event_dim(&self) -> usize {
        self.codomain().event_dim()
    }

    /// `y = f(x)`.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// `x = f⁻¹(y)`.
    fn inverse(&self, y: &Tensor) -> Result<Tensor>;

    /// `log|det ∂y/∂x|`, one value per batch element.
    fn log_abs_det_jacobian(&self, x: &Tensor, y: &Tensor) -> Result<Tensor>;

    /// Output shape for an input of `shape`.
    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        Ok(shape.to_vec())
    }

    /// Input shape for an output of `shape`.
    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        Ok(shape.to_vec())
    }
}

/// `parts[n-1] ∘ … ∘ parts[0]`: applies `parts` left to right.
#[derive(Debug, Clone)]
pub struct ComposeTransform {
    parts: Vec<TransformRef>,
}

impl ComposeTransform {
    /// Compose transforms, applied in order.
    pub fn new(parts: Vec<TransformRef>) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::InvalidParameter("ComposeTransform needs at least one part".into()));
        }
        Ok(Self { parts })
    }

    /// Component transforms.
    pub fn parts(&self) -> &[TransformRef] {
        &self.parts
    }
}

impl Transform for ComposeTransform {
    fn domain(&self) -> Constraint {
        self.parts[0].domain()
    }

    fn codomain(&self) -> Constraint {
        self.parts[self.parts.len() - 1].codomain()
    }

    fn domain_event_dim(&self) -> usize {
        // Walk back from the output: each part needs its own domain rank plus
        // whatever extra rank later parts require.
        let mut e = self.parts[self.parts.len() - 1].codomain_event_dim();
        for p in self.parts.iter().rev() {
            e = p.domain_event_dim() + e.saturating_sub(p.codomain_event_dim());
        }
        e
    }

    fn codomain_event_dim(&self) -> usize {
        let mut e = self.domain_event_dim();
        for p in &self.parts {
            e = p.codomain_event_dim() + e.saturating_sub(p.domain_event_dim());
        }
        e
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.parts.iter().try_fold(x.clone(), |acc, p| p.forward(&acc))
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        self.parts.iter().rev().try_fold(y.clone(), |acc, p| p.inverse(&acc))
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let batch_ndim = x.ndim().checked_sub(self.domain_event_dim()).ok_or_else(|| {
            Error::ShapeMismatch(format!(
                "input of shape {:?} has fewer than {} event dims",
                x.shape(),
                self.domain_event_dim()
            ))
        })?;
        let mut total: Option<Tensor> = None;
        let mut cur = x.clone();
        for p in &self.parts {
            let next = p.forward(&cur)?;
            let ladj = p.log_abs_det_jacobian(&cur, &next)?;
            let ladj = sum_rightmost(&ladj, ladj.ndim().saturating_sub(batch_ndim))?;
            total = Some(match total {
                None => ladj,
                Some(t) => &t + &ladj,
            });
            cur = next;
        }
        total.ok_or_else(|| Error::InvalidState("empty ComposeTransform".into()))
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.parts.iter().try_fold(shape.to_vec(), |s, p| p.forward_shape(&s))
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.parts.iter().rev().try_fold(shape.to_vec(), |s, p| p.inverse_shape(&s))
    }
}

/// The inverse of another transform.
#[derive(Debug, Clone)]
pub struct InverseTransform {
    base: TransformRef,
}

impl InverseTransform {
    /// Invert `base`.
    pub fn new(base: TransformRef) -> Self {
        Self { base }
    }
}

impl Transform for InverseTransform {
    fn domain(&self) -> Constraint {
        self.base.codomain()
    }

    fn codomain(&self) -> Constraint {
        self.base.domain()
    }

    fn domain_event_dim(&self) -> usize {
        self.base.codomain_event_dim()
    }

    fn codomain_event_dim(&self) -> usize {
        self.base.domain_event_dim()
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.base.inverse(x)
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        self.base.forward(y)
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        Ok(-self.base.log_abs_det_jacobian(y, x)?)
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.base.inverse_shape(shape)
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.base.forward_shape(shape)
    }
}

/// Reinterpret `n` batch dims of an elementwise transform as event dims.
///
/// `log_abs_det_jacobian` sums over the reinterpreted dims.
#[derive(Debug, Clone)]
pub struct IndependentTransform {
    base: TransformRef,
    reinterpreted_batch_ndims: usize,
}

impl IndependentTransform {
    /// Wrap `base`, moving `n` rightmost batch dims into the event.
    pub fn new(base: TransformRef, reinterpreted_batch_ndims: usize) -> Self {
        Self { base, reinterpreted_batch_ndims }
    }
}

impl Transform for IndependentTransform {
    fn domain(&self) -> Constraint {
        match (self.base.domain(), self.reinterpreted_batch_ndims) {
            (Constraint::Real, 1) => Constraint::RealVector,
            (c, _) => c,
        }
    }

    fn codomain(&self) -> Constraint {
        match (self.base.codomain(), self.reinterpreted_batch_ndims) {
            (Constraint::Real, 1) => Constraint::RealVector,
            (c, _) => c,
        }
    }

    fn domain_event_dim(&self) -> usize {
        self.base.domain_event_dim() + self.reinterpreted_batch_ndims
    }

    fn codomain_event_dim(&self) -> usize {
        self.base.codomain_event_dim() + self.reinterpreted_batch_ndims
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.base.forward(x)
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        self.base.inverse(y)
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, y: &Tensor) -> Result<Tensor> {
        sum_rightmost(&self.base.log_abs_det_jacobian(x, y)?, self.reinterpreted_batch_ndims)
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.base.forward_shape(shape)
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        self.base.inverse_shape(shape)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{scalar, vector};

    #[test]
    fn test_compose_exp_affine_matches_closed_form() {
        // y = 2 + exp(x): log|J| = x
        let t = ComposeTransform::new(vec![
            Arc::new(ExpTransform::default()),
            Arc::new(AffineTransform::new(scalar(2.0), scalar(1.0), Constraint::Positive).unwrap()),
        ])
        .unwrap();
        let x = vector(&[-1.0, 0.0, 1.5]);
        let y = t.forward(&x).unwrap();
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert_relative_eq!(*yi, 2.0 + xi.exp(), epsilon = 1e-12);
        }
        let ladj = t.log_abs_det_jacobian(&x, &y).unwrap();
        for (xi, li) in x.iter().zip(ladj.iter()) {
            assert_relative_eq!(*li, *xi, epsilon = 1e-12);
        }
        assert_eq!(t.codomain(), Constraint::greater_than(2.0));
        let back = t.inverse(&y).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inverse_negates_jacobian() {
        let base: TransformRef = Arc::new(ExpTransform::default());
        let inv = InverseTransform::new(base.clone());
        let y = vector(&[0.5, 2.0]);
        let x = inv.forward(&y).unwrap();
        let l_inv = inv.log_abs_det_jacobian(&y, &x).unwrap();
        let l_fwd = base.log_abs_det_jacobian(&x, &y).unwrap();
        for (a, b) in l_inv.iter().zip(l_fwd.iter()) {
            assert_relative_eq!(*a, -*b, epsilon = 1e-12);
        }
        assert_eq!(inv.domain(), Constraint::Positive);
    }

    #[test]
    fn test_independent_sums_over_event() {
        let t = IndependentTransform::new(Arc::new(ExpTransform::default()), 1);
        let x = vector(&[0.1, 0.2, 0.3]);
        let y = t.forward(&x).unwrap();
        let ladj = t.log_abs_det_jacobian(&x, &y).unwrap();
        assert_eq!(ladj.ndim(), 0);
        assert_relative_eq!(ladj.iter().next().copied().unwrap(), 0.6, epsilon = 1e-12);
        assert_eq!(t.domain_event_dim(), 1);
    }

    #[test]
    fn test_compose_event_dims_vector_to_matrix() {
        let t = ComposeTransform::new(vec![
            Arc::new(LowerCholeskyTransform),
            Arc::new(CholeskyProductTransform::covariance()),
        ])
        .unwrap();
        assert_eq!(t.domain_event_dim(), 1);
        assert_eq!(t.codomain_event_dim(), 2);
        assert_eq!(t.forward_shape(&[5, 6]).unwrap(), vec![5, 3, 3]);
        assert_eq!(t.inverse_shape(&[3, 3]).unwrap(), vec![6]);
    }

    #[test]
    fn test_empty_compose_rejected() {
        assert!(matches!(ComposeTransform::new(vec![]), Err(Error::InvalidParameter(_))));
    }
}
