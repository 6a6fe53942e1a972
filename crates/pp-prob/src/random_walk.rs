//! Gaussian random walk over a fixed number of steps.

use pp_core::tensor::{extended_shape, from_vec, try_map1};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use rand_distr::StandardNormal;

use crate::constraints::Constraint;
use crate::distribution::{batch_rows, check_param, sample_events, validate_value, Distribution};

/// `x_0 ~ N(0, scale)`, `x_t - x_{t-1} ~ N(0, scale)`.
#[derive(Debug, Clone)]
pub struct GaussianRandomWalk {
    scale: Tensor,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl GaussianRandomWalk {
    /// Walk of `num_steps` points with per-step `scale`.
    pub fn new(scale: Tensor, num_steps: usize) -> Result<Self> {
        check_param("scale", &Constraint::Positive, &scale)?;
        if num_steps == 0 {
            return Err(Error::InvalidParameter("num_steps must be positive".into()));
        }
        let batch_shape = scale.shape().to_vec();
        Ok(Self { scale, batch_shape, event_shape: vec![num_steps] })
    }

    /// Number of points in one walk.
    pub fn num_steps(&self) -> usize {
        self.event_shape[0]
    }
}

impl Distribution for GaussianRandomWalk {
    fn name(&self) -> &'static str {
        "GaussianRandomWalk"
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
        vec![("scale", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let scales: Vec<f64> = self.scale.iter().copied().collect();
        let n_rows = scales.len();
        let steps = self.num_steps();
        sample_events(key, &extended_shape(sample_shape, &self.batch_shape, &[]), &self.event_shape, |rng, i| {
            let s = scales[i % n_rows];
            let mut acc = 0.0;
            Ok((0..steps)
                .map(|_| {
                    let z: f64 = StandardNormal.sample(rng);
                    acc += s * z;
                    acc
                })
                .collect())
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let walks = batch_rows(value, &batch, 1)?;
        let scales = batch_rows(&self.scale, &batch, 0)?;
        let data = walks
            .iter()
            .zip(&scales)
            .map(|(w, s)| {
                let mut prev = 0.0;
                w.iter().try_fold(0.0, |lp, &x| {
                    let step = crate::normal::logpdf(x - prev, 0.0, s[0])?;
                    prev = x;
                    Ok::<f64, Error>(lp + step)
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(Tensor::zeros(self.shape(&[])))
    }

    fn variance(&self) -> Result<Tensor> {
        let steps = self.num_steps();
        let per_step = try_map1(&self.scale, |s| Ok(s * s))?;
        let data: Vec<f64> = per_step.iter().flat_map(|v| (1..=steps).map(move |t| v * t as f64)).collect();
        from_vec(&self.shape(&[]), data)
    }
}
