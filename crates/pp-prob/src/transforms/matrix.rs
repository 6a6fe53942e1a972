//! Matrix-valued transforms: Cholesky factors and their products.
//!
//! Matrices are stored row-major in the rightmost two dims. Vector
//! parameterizations list the strict lower triangle row by row
//! (`(1,0), (2,0), (2,1), ...`).

use nalgebra::DMatrix;
use pp_core::tensor::{map_events, reduce_events};
use pp_core::{Error, Result, Tensor};

use super::Transform;
use crate::constraints::Constraint;
use crate::math::softplus;

/// `n` such that `n (n + 1) / 2 == m`.
fn tri_side(m: usize) -> Result<usize> {
    let n = (((8 * m + 1) as f64).sqrt() as usize).saturating_sub(1) / 2;
    if n * (n + 1) / 2 != m {
        return Err(Error::ShapeMismatch(format!("{} is not a triangular number", m)));
    }
    Ok(n)
}

fn vec_len(shape: &[usize]) -> Result<usize> {
    shape
        .last()
        .copied()
        .ok_or_else(|| Error::ShapeMismatch("expected a vector event".into()))
}

fn square_side(shape: &[usize]) -> Result<usize> {
    match shape {
        [.., r, c] if r == c => Ok(*r),
        _ => Err(Error::ShapeMismatch(format!("expected square matrices, got shape {:?}", shape))),
    }
}

fn vec_to_matrix_shape(shape: &[usize], n: usize) -> Vec<usize> {
    let mut out = shape[..shape.len() - 1].to_vec();
    out.extend([n, n]);
    out
}

fn matrix_to_vec_shape(shape: &[usize], m: usize) -> Vec<usize> {
    let mut out = shape[..shape.len() - 2].to_vec();
    out.push(m);
    out
}

/// `ln(1 - tanh(x)^2)`, stable for large `|x|`.
fn log1m_tanh_sq(x: f64) -> f64 {
    2.0 * (std::f64::consts::LN_2 - x - softplus(-2.0 * x))
}

/// `R^{n(n+1)/2} -> lower-triangular matrices with positive diagonal`.
///
/// The first `n(n-1)/2` entries fill the strict lower triangle; the last `n`
/// entries are the log of the diagonal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowerCholeskyTransform;

impl Transform for LowerCholeskyTransform {
    fn domain(&self) -> Constraint {
        Constraint::RealVector
    }

    fn codomain(&self) -> Constraint {
        Constraint::LowerCholesky
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = tri_side(vec_len(x.shape())?)?;
        let off = n * (n - n.min(1)) / 2;
        map_events(x, 1, &[n, n], |xs| {
            let mut l = vec![0.0; n * n];
            let mut k = 0;
            for i in 1..n {
                for j in 0..i {
                    l[i * n + j] = xs[k];
                    k += 1;
                }
            }
            for i in 0..n {
                l[i * n + i] = xs[off + i].exp();
            }
            Ok(l)
        })
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        let n = square_side(y.shape())?;
        map_events(y, 2, &[n * (n + 1) / 2], |ls| {
            let mut x = Vec::with_capacity(n * (n + 1) / 2);
            for i in 1..n {
                for j in 0..i {
                    x.push(ls[i * n + j]);
                }
            }
            x.extend((0..n).map(|i| ls[i * n + i].ln()));
            Ok(x)
        })
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let n = tri_side(vec_len(x.shape())?)?;
        reduce_events(x, 1, |xs| Ok(xs[xs.len() - n..].iter().sum()))
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let n = tri_side(vec_len(shape)?)?;
        Ok(vec_to_matrix_shape(shape, n))
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let n = square_side(shape)?;
        Ok(matrix_to_vec_shape(shape, n * (n + 1) / 2))
    }
}

/// `R^{n(n-1)/2} -> Cholesky factors of correlation matrices`.
///
/// Each entry goes through `tanh` to a partial correlation in `(-1, 1)`, then
/// row `i` is filled so that it has unit norm.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrCholeskyTransform;

impl CorrCholeskyTransform {
    fn side(m: usize) -> Result<usize> {
        // m = n(n-1)/2  <=>  m = (n-1) n / 2
        Ok(tri_side(m)? + 1)
    }
}

impl Transform for CorrCholeskyTransform {
    fn domain(&self) -> Constraint {
        Constraint::RealVector
    }

    fn codomain(&self) -> Constraint {
        Constraint::CorrCholesky
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = Self::side(vec_len(x.shape())?)?;
        map_events(x, 1, &[n, n], |xs| {
            let mut l = vec![0.0; n * n];
            l[0] = 1.0;
            let mut k = 0;
            for i in 1..n {
                let mut sumsq: f64 = 0.0;
                for j in 0..i {
                    let z = xs[k].tanh() * (1.0 - sumsq).max(0.0).sqrt();
                    l[i * n + j] = z;
                    sumsq += z * z;
                    k += 1;
                }
                l[i * n + i] = (1.0 - sumsq).max(0.0).sqrt();
            }
            Ok(l)
        })
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        let n = square_side(y.shape())?;
        map_events(y, 2, &[n * (n - n.min(1)) / 2], |ls| {
            let mut x = Vec::with_capacity(n * n.saturating_sub(1) / 2);
            for i in 1..n {
                let mut sumsq: f64 = 0.0;
                for j in 0..i {
                    let v = ls[i * n + j];
                    let t = (v / (1.0 - sumsq).sqrt()).clamp(-1.0 + 1e-15, 1.0 - 1e-15);
                    x.push(t.atanh());
                    sumsq += v * v;
                }
            }
            Ok(x)
        })
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let n = Self::side(vec_len(x.shape())?)?;
        reduce_events(x, 1, |xs| {
            let mut total = 0.0;
            let mut k = 0;
            for i in 1..n {
                let mut sumsq: f64 = 0.0;
                for _ in 0..i {
                    let t = xs[k].tanh();
                    let rest = 1.0 - sumsq;
                    total += log1m_tanh_sq(xs[k]) + 0.5 * rest.ln();
                    let z = t * rest.max(0.0).sqrt();
                    sumsq += z * z;
                    k += 1;
                }
            }
            Ok(total)
        })
    }

    fn forward_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let n = Self::side(vec_len(shape)?)?;
        Ok(vec_to_matrix_shape(shape, n))
    }

    fn inverse_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        let n = square_side(shape)?;
        Ok(matrix_to_vec_shape(shape, n * n.saturating_sub(1) / 2))
    }
}

/// `L -> L Lᵀ`, from Cholesky factors to the matrices they factor.
#[derive(Debug, Clone, Copy)]
pub struct CholeskyProductTransform {
    correlation: bool,
}

impl CholeskyProductTransform {
    /// Lower-Cholesky factors to positive-definite matrices.
    pub fn covariance() -> Self {
        Self { correlation: false }
    }

    /// Correlation Cholesky factors to correlation matrices.
    pub fn correlation() -> Self {
        Self { correlation: true }
    }
}

impl Transform for CholeskyProductTransform {
    fn domain(&self) -> Constraint {
        if self.correlation {
            Constraint::CorrCholesky
        } else {
            Constraint::LowerCholesky
        }
    }

    fn codomain(&self) -> Constraint {
        if self.correlation {
            Constraint::CorrMatrix
        } else {
            Constraint::PositiveDefinite
        }
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let n = square_side(x.shape())?;
        map_events(x, 2, &[n, n], |ls| {
            let l = DMatrix::from_row_slice(n, n, ls);
            let c = &l * l.transpose();
            Ok((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|ij| c[ij]).collect())
        })
    }

    fn inverse(&self, y: &Tensor) -> Result<Tensor> {
        let n = square_side(y.shape())?;
        map_events(y, 2, &[n, n], |cs| {
            let c = DMatrix::from_row_slice(n, n, cs);
            let l = c
                .cholesky()
                .ok_or_else(|| Error::Computation("matrix is not positive definite".into()))?
                .l();
            Ok((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|ij| l[ij]).collect())
        })
    }

    fn log_abs_det_jacobian(&self, x: &Tensor, _y: &Tensor) -> Result<Tensor> {
        let n = square_side(x.shape())?;
        let correlation = self.correlation;
        reduce_events(x, 2, |ls| {
            let weighted: f64 = (0..n)
                .map(|i| {
                    let power = if correlation { n - 1 - i } else { n - i };
                    power as f64 * ls[i * n + i].ln()
                })
                .sum();
            Ok(if correlation { weighted } else { n as f64 * std::f64::consts::LN_2 + weighted })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{analytic_log_abs_det, fd_log_abs_det};
    use super::super::{ComposeTransform, TransformRef};
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{from_vec, vector};
    use std::sync::Arc;

    fn strict_lower(m: &Tensor) -> Vec<f64> {
        let n = m.shape()[0];
        (1..n).flat_map(|i| (0..i).map(move |j| (i, j))).map(|(i, j)| m[[i, j]]).collect()
    }

    fn lower_with_diag(m: &Tensor) -> Vec<f64> {
        let n = m.shape()[0];
        let mut out = strict_lower(m);
        out.extend((0..n).map(|i| m[[i, i]]));
        out
    }

    #[test]
    fn test_tri_side() {
        assert_eq!(tri_side(0).unwrap(), 0);
        assert_eq!(tri_side(1).unwrap(), 1);
        assert_eq!(tri_side(6).unwrap(), 3);
        assert!(tri_side(5).is_err());
    }

    #[test]
    fn test_lower_cholesky_roundtrip_and_jacobian() {
        let x = [0.3, -0.4, 0.9, 0.1, -0.2, 0.5];
        let y = LowerCholeskyTransform.forward(&vector(&x)).unwrap();
        assert_eq!(y.shape(), &[3, 3]);
        assert!(Constraint::LowerCholesky.check_all(&y).unwrap());
        let back = LowerCholeskyTransform.inverse(&y).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        let fd = fd_log_abs_det(&LowerCholeskyTransform, &x, lower_with_diag);
        assert_relative_eq!(analytic_log_abs_det(&LowerCholeskyTransform, &x), fd, epsilon = 1e-6);
    }

    #[test]
    fn test_corr_cholesky_rows_have_unit_norm() {
        let x = from_vec(&[2, 3], vec![0.5, -1.0, 2.0, 0.0, 0.0, 0.0]).unwrap();
        let y = CorrCholeskyTransform.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 3, 3]);
        assert!(Constraint::CorrCholesky.check_all(&y).unwrap());
        let back = CorrCholeskyTransform.inverse(&y).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_corr_cholesky_jacobian_matches_finite_difference() {
        let x = [0.5, -0.3, 0.8];
        let fd = fd_log_abs_det(&CorrCholeskyTransform, &x, strict_lower);
        assert_relative_eq!(analytic_log_abs_det(&CorrCholeskyTransform, &x), fd, epsilon = 1e-5);
    }

    #[test]
    fn test_positive_definite_chain_jacobian() {
        let parts: Vec<TransformRef> =
            vec![Arc::new(LowerCholeskyTransform), Arc::new(CholeskyProductTransform::covariance())];
        let t = ComposeTransform::new(parts).unwrap();
        let x = [0.2, -0.6, 0.4, 0.3, -0.1, 0.2];
        let y = t.forward(&vector(&x)).unwrap();
        assert!(Constraint::PositiveDefinite.check_all(&y).unwrap());
        let fd = fd_log_abs_det(&t, &x, lower_with_diag);
        assert_relative_eq!(analytic_log_abs_det(&t, &x), fd, epsilon = 1e-5);
    }

    #[test]
    fn test_corr_matrix_chain_jacobian() {
        let parts: Vec<TransformRef> =
            vec![Arc::new(CorrCholeskyTransform), Arc::new(CholeskyProductTransform::correlation())];
        let t = ComposeTransform::new(parts).unwrap();
        let x = [0.7, -0.2, 0.4];
        let y = t.forward(&vector(&x)).unwrap();
        assert!(Constraint::CorrMatrix.check_all(&y).unwrap());
        let fd = fd_log_abs_det(&t, &x, strict_lower);
        assert_relative_eq!(analytic_log_abs_det(&t, &x), fd, epsilon = 1e-5);
        let back = t.inverse(&y).unwrap();
        for (a, b) in x.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_cholesky_product_inverse_rejects_indefinite() {
        let c = from_vec(&[2, 2], vec![1.0, 2.0, 2.0, 1.0]).unwrap();
        assert!(matches!(
            CholeskyProductTransform::covariance().inverse(&c),
            Err(Error::Computation(_))
        ));
    }
}
