//! Multivariate normal distributions.
//!
//! `loc` may be batched (`[..., D]`); the scale factor is a single `[D, D]`
//! lower-triangular matrix shared by every batch member.

use nalgebra::{DMatrix, DVector};
use pp_core::tensor::{extended_shape, from_vec};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use rand_distr::StandardNormal;

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, expand, sample_events, validate_value, Distribution};
use crate::math::LN_SQRT_2PI;

fn square(t: &Tensor, name: &str) -> Result<DMatrix<f64>> {
    match t.shape() {
        [r, c] if r == c => Ok(DMatrix::from_row_slice(*r, *c, &t.iter().copied().collect::<Vec<_>>())),
        s => Err(Error::InvalidParameter(format!("{} must be a square matrix, got shape {:?}", name, s))),
    }
}

fn to_tensor(m: &DMatrix<f64>) -> Result<Tensor> {
    let (r, c) = m.shape();
    from_vec(&[r, c], (0..r).flat_map(|i| (0..c).map(move |j| (i, j))).map(|ij| m[ij]).collect())
}

/// `N(loc, L Lᵀ)`.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    loc: Tensor,
    scale_tril: DMatrix<f64>,
    half_log_det: f64,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl MultivariateNormal {
    /// From a lower-Cholesky scale factor.
    pub fn from_scale_tril(loc: Tensor, scale_tril: Tensor) -> Result<Self> {
        check_param("scale_tril", &Constraint::LowerCholesky, &scale_tril)?;
        let l = square(&scale_tril, "scale_tril")?;
        Self::build(loc, l)
    }

    /// From a positive-definite covariance matrix.
    pub fn from_covariance(loc: Tensor, covariance: Tensor) -> Result<Self> {
        check_param("covariance_matrix", &Constraint::PositiveDefinite, &covariance)?;
        let c = square(&covariance, "covariance_matrix")?;
        let l = c
            .cholesky()
            .ok_or_else(|| Error::Computation("covariance is not positive definite".into()))?
            .l();
        Self::build(loc, l)
    }

    /// From a positive-definite precision matrix.
    pub fn from_precision(loc: Tensor, precision: Tensor) -> Result<Self> {
        check_param("precision_matrix", &Constraint::PositiveDefinite, &precision)?;
        let p = square(&precision, "precision_matrix")?;
        let cov = p
            .try_inverse()
            .ok_or_else(|| Error::Computation("precision matrix is singular".into()))?;
        Self::from_covariance(loc, to_tensor(&cov)?)
    }

    fn build(loc: Tensor, scale_tril: DMatrix<f64>) -> Result<Self> {
        check_param("loc", &Constraint::RealVector, &loc)?;
        let d = scale_tril.nrows();
        let shape = loc.shape();
        if shape.last() != Some(&d) {
            return Err(Error::InvalidParameter(format!(
                "loc of shape {:?} does not match a {}x{} scale",
                shape, d, d
            )));
        }
        let half_log_det: f64 = scale_tril.diagonal().iter().map(|x| x.ln()).sum();
        let batch_shape = shape[..shape.len() - 1].to_vec();
        Ok(Self { loc, scale_tril, half_log_det, batch_shape, event_shape: vec![d] })
    }

    /// Lower-Cholesky factor of the covariance.
    pub fn scale_tril(&self) -> Result<Tensor> {
        to_tensor(&self.scale_tril)
    }

    /// Covariance matrix `L Lᵀ`.
    pub fn covariance(&self) -> Result<Tensor> {
        to_tensor(&(&self.scale_tril * self.scale_tril.transpose()))
    }
}

impl Distribution for MultivariateNormal {
    fn name(&self) -> &'static str {
        "MultivariateNormal"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::RealVector
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("loc", Constraint::RealVector), ("scale_tril", Constraint::LowerCholesky)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let batch_out = extended_shape(sample_shape, &self.batch_shape, &[]);
        let locs = batch_rows(&self.loc, &batch_out, 1)?;
        let d = self.event_shape[0];
        sample_events(key, &batch_out, &self.event_shape, |rng, i| {
            let z: DVector<f64> = DVector::from_iterator(
                d,
                (0..d).map(|_| {
                    let v: f64 = StandardNormal.sample(rng);
                    v
                }),
            );
            let x = &self.scale_tril * z;
            Ok(locs[i].iter().zip(x.iter()).map(|(m, v)| m + v).collect())
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let xs = batch_rows(value, &batch, 1)?;
        let locs = batch_rows(&self.loc, &batch, 1)?;
        let d = self.event_shape[0] as f64;
        let data = xs
            .iter()
            .zip(&locs)
            .map(|(x, m)| {
                let diff = DVector::from_iterator(x.len(), x.iter().zip(m).map(|(a, b)| a - b));
                let w = self
                    .scale_tril
                    .solve_lower_triangular(&diff)
                    .ok_or_else(|| Error::Computation("singular scale_tril".into()))?;
                Ok(-0.5 * w.norm_squared() - self.half_log_det - d * LN_SQRT_2PI)
            })
            .collect::<Result<Vec<f64>>>()?;
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.loc.clone())
    }

    fn variance(&self) -> Result<Tensor> {
        let diag: Vec<f64> = self.scale_tril.row_iter().map(|r| r.norm_squared()).collect();
        expand(&from_vec(&self.event_shape, diag)?, &self.shape(&[]))
    }
}

/// `N(loc, W Wᵀ + diag(cov_diag))` with a low-rank factor `W` of shape `[D, R]`.
#[derive(Debug, Clone)]
pub struct LowRankMultivariateNormal {
    cov_factor: Tensor,
    cov_diag: Tensor,
    inner: MultivariateNormal,
}

impl LowRankMultivariateNormal {
    /// Build from the low-rank factor and the diagonal.
    pub fn new(loc: Tensor, cov_factor: Tensor, cov_diag: Tensor) -> Result<Self> {
        check_param("cov_factor", &Constraint::Real, &cov_factor)?;
        check_param("cov_diag", &Constraint::Positive, &cov_diag)?;
        let (d, r) = match cov_factor.shape() {
            [d, r] => (*d, *r),
            s => return Err(Error::InvalidParameter(format!("cov_factor must be [D, R], got {:?}", s))),
        };
        if cov_diag.shape() != [d] {
            return Err(Error::InvalidParameter(format!(
                "cov_diag must have shape [{}], got {:?}",
                d,
                cov_diag.shape()
            )));
        }
        let w = DMatrix::from_row_slice(d, r, &cov_factor.iter().copied().collect::<Vec<_>>());
        let mut cov = &w * w.transpose();
        for (i, v) in cov_diag.iter().enumerate() {
            cov[(i, i)] += v;
        }
        let inner = MultivariateNormal::from_covariance(loc, to_tensor(&cov)?)?;
        Ok(Self { cov_factor, cov_diag, inner })
    }

    /// Low-rank factor `W`.
    pub fn cov_factor(&self) -> &Tensor {
        &self.cov_factor
    }

    /// Diagonal part of the covariance.
    pub fn cov_diag(&self) -> &Tensor {
        &self.cov_diag
    }

    /// Full covariance.
    pub fn covariance(&self) -> Result<Tensor> {
        self.inner.covariance()
    }
}

impl Distribution for LowRankMultivariateNormal {
    fn name(&self) -> &'static str {
        "LowRankMultivariateNormal"
    }
    fn batch_shape(&self) -> &[usize] {
        self.inner.batch_shape()
    }
    fn event_shape(&self) -> &[usize] {
        self.inner.event_shape()
    }
    fn support(&self) -> Constraint {
        Constraint::RealVector
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![
            ("loc", Constraint::RealVector),
            ("cov_factor", Constraint::Real),
            ("cov_diag", Constraint::Positive),
        ]
    }
    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        self.inner.sample(key, sample_shape)
    }
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        self.inner.log_prob(value)
    }
    fn mean(&self) -> Result<Tensor> {
        self.inner.mean()
    }
    fn variance(&self) -> Result<Tensor> {
        self.inner.variance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::sample_mean;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, vector};

    #[test]
    fn test_diagonal_matches_product_of_normals() {
        let cov = from_vec(&[2, 2], vec![4.0, 0.0, 0.0, 0.25]).unwrap();
        let d = MultivariateNormal::from_covariance(vector(&[1.0, -1.0]), cov).unwrap();
        let lp = as_scalar(&d.log_prob(&vector(&[0.0, 0.0])).unwrap()).unwrap();
        let expected =
            crate::normal::logpdf(0.0, 1.0, 2.0).unwrap() + crate::normal::logpdf(0.0, -1.0, 0.5).unwrap();
        assert_relative_eq!(lp, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_correlated_log_prob_closed_form() {
        let cov = from_vec(&[2, 2], vec![1.0, 0.5, 0.5, 2.0]).unwrap();
        let d = MultivariateNormal::from_covariance(vector(&[0.0, 0.0]), cov).unwrap();
        let x = [0.3, -0.7];
        // Σ⁻¹ = [[2, -0.5], [-0.5, 1]] / 1.75
        let quad = (2.0 * x[0] * x[0] - x[0] * x[1] + x[1] * x[1]) / 1.75;
        let expected = -0.5 * quad - 0.5 * 1.75f64.ln() - 2.0 * LN_SQRT_2PI;
        let lp = as_scalar(&d.log_prob(&vector(&x)).unwrap()).unwrap();
        assert_relative_eq!(lp, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_batched_loc_and_sampling() {
        let loc = from_vec(&[3, 2], vec![0.0, 0.0, 5.0, 5.0, -5.0, 1.0]).unwrap();
        let l = from_vec(&[2, 2], vec![1.0, 0.0, 0.5, 0.5]).unwrap();
        let d = MultivariateNormal::from_scale_tril(loc, l).unwrap();
        assert_eq!(d.batch_shape(), &[3]);
        let x = d.sample(PrngKey::new(12), &[2000]).unwrap();
        assert_eq!(x.shape(), &[2000, 3, 2]);
        let m = sample_mean(&x);
        assert!((m[2] - 5.0).abs() < 0.1 && (m[4] + 5.0).abs() < 0.1);
        assert_eq!(d.log_prob(&x).unwrap().shape(), &[2000, 3]);
    }

    #[test]
    fn test_precision_matches_covariance() {
        let cov = from_vec(&[2, 2], vec![2.0, 0.3, 0.3, 1.0]).unwrap();
        let det = 2.0 - 0.09;
        let prec = from_vec(&[2, 2], vec![1.0 / det, -0.3 / det, -0.3 / det, 2.0 / det]).unwrap();
        let a = MultivariateNormal::from_covariance(vector(&[0.0, 1.0]), cov).unwrap();
        let b = MultivariateNormal::from_precision(vector(&[0.0, 1.0]), prec).unwrap();
        let x = vector(&[0.4, 0.2]);
        assert_relative_eq!(
            as_scalar(&a.log_prob(&x).unwrap()).unwrap(),
            as_scalar(&b.log_prob(&x).unwrap()).unwrap(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_low_rank_matches_full() {
        let w = from_vec(&[2, 1], vec![1.0, 0.5]).unwrap();
        let lr = LowRankMultivariateNormal::new(vector(&[0.0, 0.0]), w, vector(&[1.0, 1.0])).unwrap();
        let cov = from_vec(&[2, 2], vec![2.0, 0.5, 0.5, 1.25]).unwrap();
        let full = MultivariateNormal::from_covariance(vector(&[0.0, 0.0]), cov).unwrap();
        let x = vector(&[1.0, -0.5]);
        assert_relative_eq!(
            as_scalar(&lr.log_prob(&x).unwrap()).unwrap(),
            as_scalar(&full.log_prob(&x).unwrap()).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rejects_mismatched_loc() {
        let l = from_vec(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        assert!(matches!(
            MultivariateNormal::from_scale_tril(vector(&[0.0, 0.0, 0.0]), l),
            Err(Error::InvalidParameter(_))
        ));
    }
}
