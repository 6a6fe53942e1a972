//! Elementwise transforms built from scalar [`Bijector`] kernels.

use pp_core::tensor::{broadcast_shapes, full, try_map1, try_map2, try_map3};
use pp_core::{Error, Result, Tensor};

use super::Transform;
use crate::constraints::Constraint;
use crate::math::{log_sigmoid, logit, sigmoid, softplus, softplus_inv};

/// A scalar bijection from unconstrained `z` to constrained `theta`.
pub trait Bijector: Send + Sync + std::fmt::Debug {
    /// Map unconstrained -> constrained: `theta = forward(z)`
    fn forward(&self, z: f64) -> f64;
    /// Map constrained -> unconstrained: `z = inverse(theta)`
    fn inverse(&self, theta: f64) -> f64;
    /// Log absolute derivative: `log|dtheta/dz|`
    fn log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Derivative of log|J| w.r.t. z: `d/dz log|dtheta/dz|`
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Domain of `theta`.
    fn codomain(&self) -> Constraint;
}

/// `theta = z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityBijector;

impl Bijector for IdentityBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta
    }
    #[inline]
    fn log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    fn codomain(&self) -> Constraint {
        Constraint::Real
    }
}

/// `theta = exp(z)`, `log|J| = z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpBijector;

impl Bijector for ExpBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta.ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        1.0
    }
    fn codomain(&self) -> Constraint {
        Constraint::Positive
    }
}

/// `theta = softplus(z)`.
///
/// Gentler than exp for large `z`: `theta` grows linearly instead of overflowing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftplusBijector;

impl Bijector for SoftplusBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        softplus(z)
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        softplus_inv(theta.max(1e-15))
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // d/dz softplus(z) = sigmoid(z)
        log_sigmoid(z)
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64 {
        sigmoid(-z)
    }
    fn codomain(&self) -> Constraint {
        Constraint::Positive
    }
}

/// `theta = sigmoid(z)` onto the unit interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigmoidBijector;

impl Bijector for SigmoidBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        sigmoid(z)
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        logit(theta.clamp(1e-15, 1.0 - 1e-15))
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // dtheta/dz = sigmoid(z) * sigmoid(-z)
        log_sigmoid(z) + log_sigmoid(-z)
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64 {
        1.0 - 2.0 * sigmoid(z)
    }
    fn codomain(&self) -> Constraint {
        Constraint::UnitInterval
    }
}

/// Lifts a scalar [`Bijector`] to a tensor [`Transform`] applied elementwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct Elementwise<B>(pub B);

impl<B: Bijector> Transform for Elementwise<B> {
    fn domain(&self) -> Constraint {
        Constraint::Real
    }

    fn codomain(&self) -> Constraint {
        self.0.codomain()
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.mapv(|z| self.0.forward(z)))
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        Ok(y.mapv(|t| self.0.inverse(t)))
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        Ok(x.mapv(|z| self.0.log_abs_det_jacobian(z)))
    }
}

/// Identity on reals.
pub type IdentityTransform = Elementwise<IdentityBijector>;
/// `exp`: reals -> positive reals.
pub type ExpTransform = Elementwise<ExpBijector>;
/// `softplus`: reals -> positive reals.
pub type SoftplusTransform = Elementwise<SoftplusBijector>;
/// `sigmoid`: reals -> unit interval.
pub type SigmoidTransform = Elementwise<SigmoidBijector>;

/// `y = loc + scale * x` with broadcast tensor parameters.
///
/// The codomain follows the domain: an affine map of `Positive` is
/// `GreaterThan(loc)` (or `LessThan(loc)` for negative scale), an affine map of
/// `UnitInterval` is `Interval(loc, loc + scale)`.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    loc: Tensor,
    scale: Tensor,
    domain: Constraint,
}

impl AffineTransform {
    /// Create an affine map over `domain`. `scale` must be non-zero everywhere.
    pub fn new(loc: Tensor, scale: Tensor, domain: Constraint) -> Result<Self> {
        broadcast_shapes(loc.shape(), scale.shape())?;
        if scale.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(Error::InvalidParameter("affine scale must be finite and non-zero".into()));
        }
        Ok(Self { loc, scale, domain })
    }
}

impl Transform for AffineTransform {
    fn domain(&self) -> Constraint {
        self.domain.clone()
    }

    fn codomain(&self) -> Constraint {
        let all_pos = self.scale.iter().all(|&s| s > 0.0);
        let all_neg = self.scale.iter().all(|&s| s < 0.0);
        match &self.domain {
            Constraint::Real => Constraint::Real,
            Constraint::Positive if all_pos => Constraint::GreaterThan(self.loc.clone()),
            Constraint::Positive if all_neg => Constraint::LessThan(self.loc.clone()),
            Constraint::UnitInterval if all_pos => {
                Constraint::Interval(self.loc.clone(), &self.loc + &self.scale)
            }
            _ => Constraint::Dependent,
        }
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        try_map3(x, &self.loc, &self.scale, |x, l, s| Ok(l + s * x))
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        try_map3(y, &self.loc, &self.scale, |y, l, s| Ok((y - l) / s))
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let ladj = try_map1(&self.scale, |s| Ok(s.abs().ln()))?;
        try_map2(&full(x.shape(), 0.0), &ladj, |z, l| Ok(z + l))
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let params = broadcast_shapes(self.loc.shape(), self.scale.shape())?;
        broadcast_shapes(shape, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{scalar, vector};

    fn check_roundtrip(b: &dyn Bijector, zs: &[f64], rtol: f64) {
        for &z in zs {
            let theta = b.forward(z);
            let back = b.inverse(theta);
            let scale = z.abs().max(1.0);
            assert!((z - back).abs() / scale < rtol, "roundtrip failed: z={}, theta={}, back={}", z, theta, back);
        }
    }

    fn check_grad_log_jac(b: &dyn Bijector, zs: &[f64], rtol: f64) {
        let eps = 1e-7;
        for &z in zs {
            let grad = b.grad_log_abs_det_jacobian(z);
            let fd = (b.log_abs_det_jacobian(z + eps) - b.log_abs_det_jacobian(z - eps)) / (2.0 * eps);
            assert!((grad - fd).abs() / grad.abs().max(1.0) < rtol, "z={}: analytic={}, fd={}", z, grad, fd);
        }
    }

    fn check_log_jac_is_log_derivative(b: &dyn Bijector, zs: &[f64]) {
        let eps = 1e-6;
        for &z in zs {
            let d = (b.forward(z + eps) - b.forward(z - eps)) / (2.0 * eps);
            assert_relative_eq!(b.log_abs_det_jacobian(z), d.abs().ln(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_scalar_bijectors_roundtrip() {
        let zs = [-5.0, -1.0, 0.0, 1.0, 3.0];
        check_roundtrip(&IdentityBijector, &zs, 1e-15);
        check_roundtrip(&ExpBijector, &zs, 1e-10);
        check_roundtrip(&SoftplusBijector, &[-10.0, -1.0, 0.0, 5.0, 10.0], 1e-10);
        check_roundtrip(&SigmoidBijector, &zs, 1e-9);
    }

    #[test]
    fn test_scalar_bijectors_log_jacobian() {
        let zs = [-3.0, -0.5, 0.0, 0.7, 2.5];
        check_log_jac_is_log_derivative(&ExpBijector, &zs);
        check_log_jac_is_log_derivative(&SoftplusBijector, &zs);
        check_log_jac_is_log_derivative(&SigmoidBijector, &zs);
        check_grad_log_jac(&ExpBijector, &zs, 1e-7);
        check_grad_log_jac(&SoftplusBijector, &zs, 1e-7);
        check_grad_log_jac(&SigmoidBijector, &zs, 1e-6);
    }

    #[test]
    fn test_softplus_saturates_without_overflow() {
        let t = SoftplusTransform::default();
        let y = t.forward(&vector(&[1000.0, -40.0])).unwrap();
        assert!(y[[0]].is_finite() && y[[0]] > 0.0);
        assert!(y[[1]] >= 0.0 && y[[1]] < 1e-12);
        let back = t.inverse(&y).unwrap();
        assert!((back[[0]] - 1000.0).abs() / 1000.0 < 1e-12);
    }

    #[test]
    fn test_sigmoid_stays_in_unit_interval() {
        let t = SigmoidTransform::default();
        let y = t.forward(&vector(&[-100.0, -5.0, 0.0, 5.0, 100.0])).unwrap();
        assert!(Constraint::UnitInterval.check_all(&y).unwrap());
    }

    #[test]
    fn test_affine_codomains() {
        let a = AffineTransform::new(scalar(1.0), scalar(-2.0), Constraint::Positive).unwrap();
        assert_eq!(a.codomain(), Constraint::less_than(1.0));
        let b = AffineTransform::new(scalar(-1.0), scalar(3.0), Constraint::UnitInterval).unwrap();
        assert_eq!(b.codomain(), Constraint::interval(-1.0, 2.0));
        assert!(AffineTransform::new(scalar(0.0), scalar(0.0), Constraint::Real).is_err());
    }

    #[test]
    fn test_affine_jacobian_broadcasts() {
        let a = AffineTransform::new(scalar(0.0), vector(&[2.0, 0.5]), Constraint::Real).unwrap();
        let x = vector(&[1.0, 1.0]);
        let y = a.forward(&x).unwrap();
        let l = a.log_abs_det_jacobian(&x, &y).unwrap();
        assert_relative_eq!(l[[0]], 2f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(l[[1]], 0.5f64.ln(), epsilon = 1e-12);
    }
}
