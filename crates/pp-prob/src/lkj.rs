//! LKJ distributions over correlation matrices and their Cholesky factors.
//!
//! Density of a `D x D` correlation matrix `C` is proportional to
//! `det(C)^(concentration - 1)`. Sampling uses the onion method.

use std::f64::consts::LN_2;

use nalgebra::{DMatrix, DVector};
use pp_core::tensor::{extended_shape, from_vec};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use rand_distr::StandardNormal;

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, sample_events, validate_value, Distribution};
use crate::math::ln_beta;

/// `ln` of the LKJ normalizing constant for dimension `dim`.
pub fn log_normalizer(dim: usize, concentration: f64) -> f64 {
    (1..dim)
        .map(|k| {
            let dk = (dim - k) as f64;
            let b = concentration + 0.5 * (dk - 1.0);
            dk * ((2.0 * concentration - 2.0 + dk) * LN_2 + ln_beta(b, b))
        })
        .sum()
}

/// Onion-method draw of a correlation Cholesky factor, row-major.
fn onion<R: rand::Rng + ?Sized>(rng: &mut R, dim: usize, eta: f64) -> Result<Vec<f64>> {
    let mut l = vec![0.0; dim * dim];
    l[0] = 1.0;
    for i in 1..dim {
        let j = (i - 1) as f64;
        let a = 0.5 * (j + 1.0);
        let b = eta + 0.5 * (dim as f64 - 2.0) - 0.5 * j;
        let y = crate::beta::draw(rng, a, b)?;
        let u: DVector<f64> = DVector::from_iterator(
            i,
            (0..i).map(|_| {
                let v: f64 = StandardNormal.sample(rng);
                v
            }),
        );
        let norm = u.norm();
        let r = y.sqrt();
        for (k, uk) in u.iter().enumerate() {
            l[i * dim + k] = r * uk / norm;
        }
        l[i * dim + i] = (1.0 - y).max(f64::MIN_POSITIVE).sqrt();
    }
    Ok(l)
}

fn check_dim(dim: usize) -> Result<()> {
    if dim < 2 {
        return Err(Error::InvalidParameter(format!("LKJ dimension must be >= 2, got {}", dim)));
    }
    Ok(())
}

/// LKJ over lower Cholesky factors of correlation matrices.
#[derive(Debug, Clone)]
pub struct LKJCholesky {
    dim: usize,
    concentration: Tensor,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl LKJCholesky {
    /// `dim x dim` factors; `concentration` may be batched.
    pub fn new(dim: usize, concentration: Tensor) -> Result<Self> {
        check_dim(dim)?;
        check_param("concentration", &Constraint::Positive, &concentration)?;
        let batch_shape = concentration.shape().to_vec();
        Ok(Self { dim, concentration, batch_shape, event_shape: vec![dim, dim] })
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Distribution for LKJCholesky {
    fn name(&self) -> &'static str {
        "LKJCholesky"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::CorrCholesky
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let etas: Vec<f64> = self.concentration.iter().copied().collect();
        let n_rows = etas.len();
        let dim = self.dim;
        sample_events(key, &extended_shape(sample_shape, &self.batch_shape, &[]), &self.event_shape, |rng, i| {
            onion(rng, dim, etas[i % n_rows])
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let ls = batch_rows(value, &batch, 2)?;
        let etas = batch_rows(&self.concentration, &batch, 0)?;
        let d = self.dim;
        let data = ls
            .iter()
            .zip(&etas)
            .map(|(l, eta)| {
                let eta = eta[0];
                let unnorm: f64 = (1..d)
                    .map(|i| l[i * d + i].ln() * (2.0 * (eta - 1.0) + (d - 1 - i) as f64))
                    .sum();
                unnorm - log_normalizer(d, eta)
            })
            .collect();
        from_vec(&batch, data)
    }
}

/// LKJ over correlation matrices.
#[derive(Debug, Clone)]
pub struct LKJ {
    cholesky: LKJCholesky,
}

impl LKJ {
    /// `dim x dim` correlation matrices; `concentration` may be batched.
    pub fn new(dim: usize, concentration: Tensor) -> Result<Self> {
        Ok(Self { cholesky: LKJCholesky::new(dim, concentration)? })
    }
}

impl Distribution for LKJ {
    fn name(&self) -> &'static str {
        "LKJ"
    }
    fn batch_shape(&self) -> &[usize] {
        self.cholesky.batch_shape()
    }
    fn event_shape(&self) -> &[usize] {
        self.cholesky.event_shape()
    }
    fn support(&self) -> Constraint {
        Constraint::CorrMatrix
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        self.cholesky.arg_constraints()
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let l = self.cholesky.sample(key, sample_shape)?;
        crate::transforms::Transform::forward(&crate::transforms::CholeskyProductTransform::correlation(), &l)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let d = self.cholesky.dim;
        let cs = batch_rows(value, &batch, 2)?;
        let etas = batch_rows(&self.cholesky.concentration, &batch, 0)?;
        let data = cs
            .iter()
            .zip(&etas)
            .map(|(c, eta)| {
                let chol = DMatrix::from_row_slice(d, d, c)
                    .cholesky()
                    .ok_or_else(|| Error::Computation("correlation matrix is not positive definite".into()))?;
                let log_det: f64 = 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
                Ok((eta[0] - 1.0) * log_det - log_normalizer(d, eta[0]))
            })
            .collect::<Result<Vec<f64>>>()?;
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        let d = self.cholesky.dim;
        let n = self.cholesky.concentration.len();
        let data: Vec<f64> = (0..n * d * d)
            .map(|k| {
                let k = k % (d * d);
                if k / d == k % d {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        from_vec(&self.shape(&[]), data)
    }
}
