//! The distribution interface and the helpers shared by the catalog.
//!
//! Shapes follow the batch/event split: a distribution with `batch_shape = B`
//! and `event_shape = E` samples tensors of shape `S ++ B ++ E` for a sample
//! shape `S`, and `log_prob` of such a tensor has shape `S ++ B`.

use std::fmt;
use std::sync::Arc;

use pp_core::tensor::{broadcast_all, broadcast_shapes, broadcast_to, extended_shape, from_vec, numel};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::rngs::StdRng;

use crate::constraints::{flat_broadcast, Constraint};

/// Shared handle to a distribution.
pub type DistRef = Arc<dyn Distribution>;

/// A probability distribution over tensors.
pub trait Distribution: Send + Sync + fmt::Debug {
    /// Family name, used in messages and traces.
    fn name(&self) -> &'static str;

    /// Shape of independent, non-identical batch members.
    fn batch_shape(&self) -> &[usize];

    /// Shape of one draw.
    fn event_shape(&self) -> &[usize];

    /// Domain of draws.
    fn support(&self) -> Constraint;

    /// Declared constraint of each parameter.
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        Vec::new()
    }

    /// Whether draws are countable.
    fn is_discrete(&self) -> bool {
        self.support().is_discrete()
    }

    /// `event_shape().len()`.
    fn event_dim(&self) -> usize {
        self.event_shape().len()
    }

    /// `sample_shape ++ batch_shape ++ event_shape`.
    fn shape(&self, sample_shape: &[usize]) -> Vec<usize> {
        extended_shape(sample_shape, self.batch_shape(), self.event_shape())
    }

    /// Draw `sample_shape` independent samples using `key`.
    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor>;

    /// Log density (or mass) of `value`, one entry per batch element.
    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;

    /// Mean, with shape `batch_shape ++ event_shape`.
    fn mean(&self) -> Result<Tensor> {
        Err(Error::NotImplemented(format!("{} does not provide a mean", self.name())))
    }

    /// Variance, with shape `batch_shape ++ event_shape`.
    fn variance(&self) -> Result<Tensor> {
        Err(Error::NotImplemented(format!("{} does not provide a variance", self.name())))
    }

    /// Whether [`Distribution::enumerate_support`] is available.
    fn has_enumerate_support(&self) -> bool {
        false
    }

    /// Every support value along a new leading dim.
    ///
    /// With `expand = false` the result has shape `[K] ++ [1; batch_ndim] ++ event_shape`,
    /// otherwise `[K] ++ batch_shape ++ event_shape`.
    fn enumerate_support(&self, _expand: bool) -> Result<Tensor> {
        Err(Error::NotImplemented(format!("{} has no finite support to enumerate", self.name())))
    }
}

/// Check event dims, batch compatibility and support of a `log_prob` input.
///
/// Returns the shape `log_prob` should produce.
pub fn validate_value(dist: &dyn Distribution, value: &Tensor) -> Result<Vec<usize>> {
    let event = dist.event_shape();
    let shape = value.shape();
    if shape.len() < event.len() || &shape[shape.len() - event.len()..] != event {
        return Err(Error::ShapeMismatch(format!(
            "{} expects values with event shape {:?}, got {:?}",
            dist.name(),
            event,
            shape
        )));
    }
    let out = broadcast_shapes(&shape[..shape.len() - event.len()], dist.batch_shape())?;
    let support = dist.support();
    if support != Constraint::Dependent {
        support.validate(value, &format!("{} value", dist.name()))?;
    }
    Ok(out)
}

/// Broadcast shape of the given parameters.
pub(crate) fn params_shape(params: &[&Tensor]) -> Result<Vec<usize>> {
    let shapes: Vec<&[usize]> = params.iter().map(|p| p.shape()).collect();
    broadcast_all(&shapes).map_err(|e| Error::InvalidParameter(format!("parameter shapes do not broadcast: {}", e)))
}

/// Materialize `t` at `shape`.
pub(crate) fn expand(t: &Tensor, shape: &[usize]) -> Result<Tensor> {
    Ok(broadcast_to(t, shape)?.to_owned())
}

/// Draw one value per element of `out_shape`, feeding `f` the broadcast
/// parameters at that position.
pub(crate) fn sample_elementwise<F>(key: PrngKey, out_shape: &[usize], params: &[&Tensor], mut f: F) -> Result<Tensor>
where
    F: FnMut(&mut StdRng, &[f64]) -> Result<f64>,
{
    let flat = params.iter().map(|p| flat_broadcast(p, out_shape)).collect::<Result<Vec<_>>>()?;
    let mut rng = key.to_rng();
    let n = numel(out_shape);
    let mut args = vec![0.0; params.len()];
    let mut data = Vec::with_capacity(n);
    for i in 0..n {
        for (a, p) in args.iter_mut().zip(&flat) {
            *a = p[i];
        }
        data.push(f(&mut rng, &args)?);
    }
    from_vec(out_shape, data)
}

/// Draw one event per batch position of `batch_out`; `f` receives the row
/// index into the caller's per-batch parameter table and returns one event.
pub(crate) fn sample_events<F>(key: PrngKey, batch_out: &[usize], event_shape: &[usize], mut f: F) -> Result<Tensor>
where
    F: FnMut(&mut StdRng, usize) -> Result<Vec<f64>>,
{
    let mut rng = key.to_rng();
    let n = numel(batch_out);
    let event_len = numel(event_shape);
    let mut data = Vec::with_capacity(n * event_len);
    for i in 0..n {
        let e = f(&mut rng, i)?;
        if e.len() != event_len {
            return Err(Error::ShapeMismatch(format!(
                "sampled event of {} values, expected shape {:?}",
                e.len(),
                event_shape
            )));
        }
        data.extend(e);
    }
    from_vec(&extended_shape(&[], batch_out, event_shape), data)
}

/// Broadcast the batch part of `t` (all but its rightmost `event_ndim` dims)
/// to `batch` and return one flattened event per batch position.
pub(crate) fn batch_rows(t: &Tensor, batch: &[usize], event_ndim: usize) -> Result<Vec<Vec<f64>>> {
    let shape = t.shape();
    if shape.len() < event_ndim {
        return Err(Error::ShapeMismatch(format!("tensor of shape {:?} has fewer than {} event dims", shape, event_ndim)));
    }
    let event = &shape[shape.len() - event_ndim..];
    let full = extended_shape(&[], batch, event);
    let flat = flat_broadcast(t, &full)?;
    let len = numel(event);
    if len == 0 {
        return Ok(vec![Vec::new(); numel(batch)]);
    }
    Ok(flat.chunks(len).map(|c| c.to_vec()).collect())
}

/// Finite support `values` laid out along a new leading dim.
pub(crate) fn enumerate_values(values: &[f64], batch_shape: &[usize], expand: bool) -> Result<Tensor> {
    let tail: Vec<usize> = if expand { batch_shape.to_vec() } else { vec![1; batch_shape.len()] };
    let per = numel(&tail);
    let data: Vec<f64> = values.iter().flat_map(|&v| std::iter::repeat(v).take(per)).collect();
    let mut shape = vec![values.len()];
    shape.extend(tail);
    from_vec(&shape, data)
}

/// Reject a parameter that violates `constraint`.
pub(crate) fn check_param(name: &str, constraint: &Constraint, value: &Tensor) -> Result<()> {
    constraint.validate_param(name, value)
}
