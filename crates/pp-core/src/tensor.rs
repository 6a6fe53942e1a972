//! Tensor alias and numpy-style broadcasting helpers.
//!
//! All numeric values flow through `ndarray::ArrayD<f64>`. Discrete values are
//! stored as integral `f64`; booleans as `0.0` / `1.0`.

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};

use crate::{Error, Result};

/// Dynamic-rank `f64` array used for parameters, values and log-densities.
pub type Tensor = ArrayD<f64>;

/// 0-d tensor holding `x`.
pub fn scalar(x: f64) -> Tensor {
    ArrayD::from_elem(IxDyn(&[]), x)
}

/// Tensor of `shape` filled with `x`.
pub fn full(shape: &[usize], x: f64) -> Tensor {
    ArrayD::from_elem(IxDyn(shape), x)
}

/// Build a row-major tensor from `data`.
pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor> {
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| Error::ShapeMismatch(format!("cannot build tensor of shape {:?}: {}", shape, e)))
}

/// 1-d tensor from a slice.
pub fn vector(data: &[f64]) -> Tensor {
    Array1::from(data.to_vec()).into_dyn()
}

/// Product of dimensions.
#[inline]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Broadcast two shapes with numpy semantics (right-aligned, size-1 stretches).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let da = if i + a.len() < n { 1 } else { a[i + a.len() - n] };
        let db = if i + b.len() < n { 1 } else { b[i + b.len() - n] };
        let d = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(Error::ShapeMismatch(format!(
                "cannot broadcast shapes {:?} and {:?}",
                a, b
            )));
        };
        out.push(d);
    }
    Ok(out)
}

/// Broadcast any number of shapes.
pub fn broadcast_all(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    shapes.iter().try_fold(Vec::new(), |acc, s| broadcast_shapes(&acc, s))
}

/// Read-only broadcast view of `t` with `shape`.
pub fn broadcast_to<'a>(t: &'a Tensor, shape: &[usize]) -> Result<ArrayViewD<'a, f64>> {
    t.broadcast(IxDyn(shape)).ok_or_else(|| {
        Error::ShapeMismatch(format!("cannot broadcast {:?} to {:?}", t.shape(), shape))
    })
}

/// Split `shape` into its batch part, dropping the rightmost `event_dim` dims.
pub fn batch_part(shape: &[usize], event_dim: usize) -> Result<&[usize]> {
    if shape.len() < event_dim {
        return Err(Error::ShapeMismatch(format!(
            "value of shape {:?} has fewer than {} event dims",
            shape, event_dim
        )));
    }
    Ok(&shape[..shape.len() - event_dim])
}

/// `sample_shape ++ batch_shape ++ event_shape`.
pub fn extended_shape(sample_shape: &[usize], batch: &[usize], event: &[usize]) -> Vec<usize> {
    sample_shape.iter().chain(batch).chain(event).copied().collect()
}

/// Apply a fallible elementwise kernel to one tensor.
pub fn try_map1<F>(a: &Tensor, f: F) -> Result<Tensor>
where
    F: Fn(f64) -> Result<f64>,
{
    let data = a.iter().map(|&x| f(x)).collect::<Result<Vec<f64>>>()?;
    from_vec(a.shape(), data)
}

/// Broadcast two tensors and apply a fallible elementwise kernel.
pub fn try_map2<F>(a: &Tensor, b: &Tensor, f: F) -> Result<Tensor>
where
    F: Fn(f64, f64) -> Result<f64>,
{
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let av = broadcast_to(a, &shape)?;
    let bv = broadcast_to(b, &shape)?;
    let data = av.iter().zip(bv.iter()).map(|(&x, &y)| f(x, y)).collect::<Result<Vec<f64>>>()?;
    from_vec(&shape, data)
}

/// Broadcast three tensors and apply a fallible elementwise kernel.
pub fn try_map3<F>(a: &Tensor, b: &Tensor, c: &Tensor, f: F) -> Result<Tensor>
where
    F: Fn(f64, f64, f64) -> Result<f64>,
{
    let shape = broadcast_all(&[a.shape(), b.shape(), c.shape()])?;
    let av = broadcast_to(a, &shape)?;
    let bv = broadcast_to(b, &shape)?;
    let cv = broadcast_to(c, &shape)?;
    let data = av
        .iter()
        .zip(bv.iter())
        .zip(cv.iter())
        .map(|((&x, &y), &z)| f(x, y, z))
        .collect::<Result<Vec<f64>>>()?;
    from_vec(&shape, data)
}

/// Broadcast four tensors and apply a fallible elementwise kernel.
pub fn try_map4<F>(a: &Tensor, b: &Tensor, c: &Tensor, d: &Tensor, f: F) -> Result<Tensor>
where
    F: Fn(f64, f64, f64, f64) -> Result<f64>,
{
    let shape = broadcast_all(&[a.shape(), b.shape(), c.shape(), d.shape()])?;
    let av = broadcast_to(a, &shape)?;
    let bv = broadcast_to(b, &shape)?;
    let cv = broadcast_to(c, &shape)?;
    let dv = broadcast_to(d, &shape)?;
    let data = av
        .iter()
        .zip(bv.iter())
        .zip(cv.iter())
        .zip(dv.iter())
        .map(|(((&x, &y), &z), &w)| f(x, y, z, w))
        .collect::<Result<Vec<f64>>>()?;
    from_vec(&shape, data)
}

/// Sum over the rightmost `n` axes.
pub fn sum_rightmost(t: &Tensor, n: usize) -> Result<Tensor> {
    if n > t.ndim() {
        return Err(Error::ShapeMismatch(format!(
            "cannot sum {} rightmost dims of a {}-d tensor",
            n,
            t.ndim()
        )));
    }
    let mut out = t.clone();
    for _ in 0..n {
        let last = out.ndim() - 1;
        out = out.sum_axis(Axis(last));
    }
    Ok(out)
}

/// Row-major view of the rightmost `event_dim` dims as consecutive chunks.
///
/// Returns `(batch_shape, chunks)` where each chunk is one event flattened.
pub fn event_chunks(t: &Tensor, event_dim: usize) -> Result<(Vec<usize>, Vec<Vec<f64>>)> {
    let batch = batch_part(t.shape(), event_dim)?.to_vec();
    let event_len = numel(&t.shape()[batch.len()..]);
    let flat: Vec<f64> = t.iter().copied().collect();
    let chunks = if event_len == 0 {
        vec![Vec::new(); numel(&batch)]
    } else {
        flat.chunks(event_len).map(|c| c.to_vec()).collect()
    };
    Ok((batch, chunks))
}

/// Map every event (rightmost `in_event_dim` dims) to a new event of `out_event_shape`.
pub fn map_events<F>(x: &Tensor, in_event_dim: usize, out_event_shape: &[usize], f: F) -> Result<Tensor>
where
    F: Fn(&[f64]) -> Result<Vec<f64>>,
{
    let (batch, events) = event_chunks(x, in_event_dim)?;
    let out_len = numel(out_event_shape);
    let mut data = Vec::with_capacity(events.len() * out_len);
    for e in &events {
        let out = f(e)?;
        if out.len() != out_len {
            return Err(Error::ShapeMismatch(format!(
                "event map produced {} values, expected shape {:?}",
                out.len(),
                out_event_shape
            )));
        }
        data.extend(out);
    }
    from_vec(&extended_shape(&[], &batch, out_event_shape), data)
}

/// Reduce every event (rightmost `event_dim` dims) to a scalar.
pub fn reduce_events<F>(x: &Tensor, event_dim: usize, f: F) -> Result<Tensor>
where
    F: Fn(&[f64]) -> Result<f64>,
{
    let (batch, events) = event_chunks(x, event_dim)?;
    let data = events.iter().map(|e| f(e)).collect::<Result<Vec<f64>>>()?;
    from_vec(&batch, data)
}

/// Stable `log(sum(exp(xs)))`; `-inf` for an empty slice.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let m = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if m == f64::INFINITY {
        return f64::INFINITY;
    }
    m + xs.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}

/// Log-sum-exp reduction along `axis`.
pub fn logsumexp_axis(t: &Tensor, axis: usize) -> Result<Tensor> {
    if axis >= t.ndim() {
        return Err(Error::ShapeMismatch(format!(
            "axis {} out of range for {}-d tensor",
            axis,
            t.ndim()
        )));
    }
    Ok(t.map_axis(Axis(axis), |lane| {
        let v: Vec<f64> = lane.iter().copied().collect();
        logsumexp(&v)
    }))
}

/// Extract the value of a 0-d (or single-element) tensor.
pub fn as_scalar(t: &Tensor) -> Result<f64> {
    if t.len() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "expected a single element, got shape {:?}",
            t.shape()
        )));
    }
    t.iter().next().copied().ok_or_else(|| Error::ShapeMismatch("empty tensor".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_broadcast_shapes_numpy_rules() {
        assert_eq!(broadcast_shapes(&[3, 1], &[4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shapes(&[], &[2, 5]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_all(&[&[1], &[2, 1], &[3]]).unwrap(), vec![2, 3]);
        assert!(matches!(broadcast_shapes(&[3], &[4]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_try_map2_broadcasts_scalar() {
        let a = vector(&[1.0, 2.0, 3.0]);
        let b = scalar(10.0);
        let c = try_map2(&a, &b, |x, y| Ok(x * y)).unwrap();
        assert_eq!(c.shape(), &[3]);
        assert_eq!(c.iter().copied().collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_try_map_propagates_first_error() {
        let a = vector(&[1.0, -1.0]);
        let r = try_map1(&a, |x| {
            if x < 0.0 {
                Err(Error::InvalidParameter("negative".into()))
            } else {
                Ok(x)
            }
        });
        assert!(matches!(r, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_sum_rightmost() {
        let t = from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let s = sum_rightmost(&t, 1).unwrap();
        assert_eq!(s.iter().copied().collect::<Vec<_>>(), vec![6.0, 15.0]);
        let all = sum_rightmost(&t, 2).unwrap();
        assert_eq!(as_scalar(&all).unwrap(), 21.0);
    }

    #[test]
    fn test_logsumexp_stable() {
        let v = logsumexp(&[1000.0, 1000.0]);
        assert_relative_eq!(v, 1000.0 + 2f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_event_chunks() {
        let t = from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let (batch, chunks) = event_chunks(&t, 1).unwrap();
        assert_eq!(batch, vec![2]);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }
}
