//! Vector-valued transforms: stick-breaking onto the simplex and the ordered-vector map.

use pp_core::tensor::{map_events, reduce_events};
use pp_core::{Error, Result, Tensor};

use super::Transform;
use crate::constraints::Constraint;
use crate::math::{log_sigmoid, logit, sigmoid};

fn last_dim(shape: &[usize], what: &str) -> Result<usize> {
    shape
        .last()
        .copied()
        .ok_or_else(|| Error::ShapeMismatch(format!("{} needs at least one event dim", what)))
}

/// `R^{K-1} -> simplex in R^K`.
///
/// Each coordinate breaks a fraction `sigmoid(x_i - ln(K-1-i))` off the
/// remaining stick; the offset makes `x = 0` map to the uniform point.
#[derive(Debug, Clone, Copy, Default)]
pub struct StickBreakingTransform;

impl StickBreakingTransform {
    fn offset(n: usize, i: usize) -> f64 {
        ((n - i) as f64).ln()
    }
}

impl Transform for StickBreakingTransform {
    fn domain(&self) -> Constraint {
        Constraint::RealVector
    }

    fn codomain(&self) -> Constraint {
        Constraint::Simplex
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = last_dim(x.shape(), "stick-breaking")?;
        map_events(x, 1, &[n + 1], |xs| {
            let mut y = Vec::with_capacity(n + 1);
            let mut remaining = 1.0;
            for (i, &xi) in xs.iter().enumerate() {
                let z = sigmoid(xi - Self::offset(n, i));
                y.push(z * remaining);
                remaining *= 1.0 - z;
            }
            y.push(remaining);
            Ok(y)
        })
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        let k = last_dim(y.shape(), "stick-breaking")?;
        if k == 0 {
            return Err(Error::ShapeMismatch("simplex must have at least one coordinate".into()));
        }
        let n = k - 1;
        map_events(y, 1, &[n], |ys| {
            let mut x = Vec::with_capacity(n);
            let mut remaining = 1.0;
            for (i, &yi) in ys[..n].iter().enumerate() {
                let z = (yi / remaining).clamp(1e-15, 1.0 - 1e-15);
                x.push(logit(z) + Self::offset(n, i));
                remaining -= yi;
            }
            Ok(x)
        })
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let n = last_dim(x.shape(), "stick-breaking")?;
        reduce_events(x, 1, |xs| {
            let mut total = 0.0;
            let mut log_remaining = 0.0;
            for (i, &xi) in xs.iter().enumerate() {
                let t = xi - Self::offset(n, i);
                total += log_sigmoid(t) + log_sigmoid(-t) + log_remaining;
                log_remaining += log_sigmoid(-t);
            }
            Ok(total)
        })
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let n = last_dim(shape, "stick-breaking")?;
        let mut out = shape.to_vec();
        *out.last_mut().ok_or_else(|| Error::InvalidState("empty shape".into()))? = n + 1;
        Ok(out)
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let k = last_dim(shape, "stick-breaking")?;
        if k == 0 {
            return Err(Error::ShapeMismatch("simplex must have at least one coordinate".into()));
        }
        let mut out = shape.to_vec();
        *out.last_mut().ok_or_else(|| Error::InvalidState("empty shape".into()))? = k - 1;
        Ok(out)
    }
}

/// `R^K -> ordered vectors`: `y_0 = x_0`, `y_i = y_{i-1} + exp(x_i)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedTransform;

impl Transform for OrderedTransform {
    fn domain(&self) -> Constraint {
        Constraint::RealVector
    }

    fn codomain(&self) -> Constraint {
        Constraint::OrderedVector
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = last_dim(x.shape(), "ordered")?;
        map_events(x, 1, &[n], |xs| {
            let mut acc = 0.0;
            Ok(xs
                .iter()
                .enumerate()
                .map(|(i, &xi)| {
                    acc = if i == 0 { xi } else { acc + xi.exp() };
                    acc
                })
                .collect())
        })
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        let n = last_dim(y.shape(), "ordered")?;
        map_events(y, 1, &[n], |ys| {
            Ok(ys
                .iter()
                .enumerate()
                .map(|(i, &yi)| if i == 0 { yi } else { (yi - ys[i - 1]).ln() })
                .collect())
        })
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        reduce_events(x, 1, |xs| Ok(xs.iter().skip(1).sum()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{analytic_log_abs_det, fd_log_abs_det};
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{from_vec, vector};

    #[test]
    fn test_stick_breaking_origin_is_uniform() {
        let y = StickBreakingTransform.forward(&vector(&[0.0, 0.0, 0.0])).unwrap();
        for v in y.iter() {
            assert_relative_eq!(*v, 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stick_breaking_roundtrip_batched() {
        let x = from_vec(&[2, 3], vec![0.3, -1.2, 2.0, -4.0, 0.5, 0.0]).unwrap();
        let y = StickBreakingTransform.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 4]);
        assert!(Constraint::Simplex.check_all(&y).unwrap());
        let back = StickBreakingTransform.inverse(&y).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-8);
        }
        assert_eq!(StickBreakingTransform.log_abs_det_jacobian(&x, &y).unwrap().shape(), &[2]);
    }

    #[test]
    fn test_stick_breaking_jacobian_matches_finite_difference() {
        let x = [0.4, -0.7, 1.3];
        let fd = fd_log_abs_det(&StickBreakingTransform, &x, |y| y.iter().take(3).copied().collect());
        assert_relative_eq!(analytic_log_abs_det(&StickBreakingTransform, &x), fd, epsilon = 1e-5);
    }

    #[test]
    fn test_ordered_roundtrip_and_jacobian() {
        let x = [-1.0, 0.2, -0.5, 1.1];
        let xt = vector(&x);
        let y = OrderedTransform.forward(&xt).unwrap();
        assert!(Constraint::OrderedVector.check_all(&y).unwrap());
        let back = OrderedTransform.inverse(&y).unwrap();
        for (a, b) in xt.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        let fd = fd_log_abs_det(&OrderedTransform, &x, |y| y.iter().copied().collect());
        assert_relative_eq!(analytic_log_abs_det(&OrderedTransform, &x), fd, epsilon = 1e-6);
    }

    #[test]
    fn test_stick_breaking_shapes() {
        assert_eq!(StickBreakingTransform.forward_shape(&[7, 2]).unwrap(), vec![7, 3]);
        assert_eq!(StickBreakingTransform.inverse_shape(&[3]).unwrap(), vec![2]);
        assert!(StickBreakingTransform.forward_shape(&[]).is_err());
    }
}
