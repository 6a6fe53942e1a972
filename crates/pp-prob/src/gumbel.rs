//! Gumbel and its continuous relaxation of the categorical.

use pp_core::tensor::{event_chunks, extended_shape, from_vec, try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, params_shape, sample_elementwise, sample_events, validate_value, Distribution};
use crate::math::softmax;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Log-PDF of `Gumbel(loc, scale)` at `x`.
pub fn logpdf(x: f64, loc: f64, scale: f64) -> Result<f64> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidParameter(format!("scale must be finite and > 0, got {}", scale)));
    }
    let z = (x - loc) / scale;
    Ok(-(z + (-z).exp()) - scale.ln())
}

fn std_gumbel<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u: f64 = rng.random_range(f64::MIN_POSITIVE..1.0);
    -(-u.ln()).ln()
}

/// `Gumbel(loc, scale)`.
#[derive(Debug, Clone)]
pub struct Gumbel {
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl Gumbel {
    /// Create a batched Gumbel.
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&loc, &scale])?;
        Ok(Self { loc, scale, batch_shape })
    }
}

impl Distribution for Gumbel {
    fn name(&self) -> &'static str {
        "Gumbel"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Real
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("loc", Constraint::Real), ("scale", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.loc, &self.scale], |rng, p| {
            Ok(p[0] + p[1] * std_gumbel(rng))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.loc, &self.scale, logpdf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.loc, &self.scale, |m, s| Ok(m + s * EULER_GAMMA))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.loc, &self.scale, |_, s| Ok(std::f64::consts::PI.powi(2) / 6.0 * s * s))
    }
}

/// Gumbel-softmax (Concrete) relaxation of `Categorical(probs)` at `temperature`.
///
/// Draws are `softmax((ln probs + g) / temperature)` with i.i.d. standard
/// Gumbel `g`; they live on the simplex.
#[derive(Debug, Clone)]
pub struct GumbelSoftmaxProbs {
    probs: Tensor,
    temperature: f64,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl GumbelSoftmaxProbs {
    /// `probs` has the categories in its last dim.
    pub fn new(probs: Tensor, temperature: f64) -> Result<Self> {
        if probs.ndim() == 0 {
            return Err(Error::InvalidParameter("probs must be at least 1-d".into()));
        }
        check_param("probs", &Constraint::Simplex, &probs)?;
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(Error::InvalidParameter(format!("temperature must be > 0, got {}", temperature)));
        }
        let shape = probs.shape().to_vec();
        let (batch, event) = shape.split_at(shape.len() - 1);
        Ok(Self { batch_shape: batch.to_vec(), event_shape: event.to_vec(), probs, temperature })
    }
}

impl Distribution for GumbelSoftmaxProbs {
    fn name(&self) -> &'static str {
        "GumbelSoftmaxProbs"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::Simplex
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("probs", Constraint::Simplex)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let (_, rows) = event_chunks(&self.probs, 1)?;
        let n_rows = rows.len();
        let tau = self.temperature;
        sample_events(key, &extended_shape(sample_shape, &self.batch_shape, &[]), &self.event_shape, |rng, i| {
            let scores: Vec<f64> = rows[i % n_rows].iter().map(|p| (p.ln() + std_gumbel(rng)) / tau).collect();
            Ok(softmax(&scores))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let ys = batch_rows(value, &batch, 1)?;
        let ps = batch_rows(&self.probs, &batch, 1)?;
        let tau = self.temperature;
        let k = self.event_shape[0] as f64;
        let data = ys
            .iter()
            .zip(&ps)
            .map(|(y, p)| {
                let log_terms: Vec<f64> = y.iter().zip(p).map(|(&yi, &pi)| pi.ln() - tau * yi.ln()).collect();
                let lse = pp_core::tensor::logsumexp(&log_terms);
                let body: f64 = y.iter().zip(p).map(|(&yi, &pi)| pi.ln() - (tau + 1.0) * yi.ln()).sum();
                ln_gamma(k) + (k - 1.0) * tau.ln() + body - k * lse
            })
            .collect();
        from_vec(&batch, data)
    }
}
