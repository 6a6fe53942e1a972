//! Dense `ndarray` factor backend.

use ndarray::{Axis, IxDyn};
use pp_core::tensor::{full, logsumexp_axis};
use pp_core::{Error, Result, Tensor};

use crate::backend::{FactorBackend, ReduceOp};
use crate::factor::Factor;

/// Materializes every factor as a full table.
///
/// Products broadcast over the union of dims; cost is exponential in the
/// number of enumerated variables a factor spans, which is fine for the
/// small tree-width models enumeration targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseBackend;

impl DenseBackend {
    /// Registry name.
    pub const NAME: &'static str = "dense";
}

/// Lay `f` out over `dims` (a superset of its own), with size-1 axes where
/// the factor does not span a dim.
fn align(f: &Factor, dims: &[String]) -> Result<Tensor> {
    let present: Vec<&str> = dims.iter().filter(|d| f.has_dim(d)).map(String::as_str).collect();
    let t = f.to_tensor(&present)?;
    let shape: Vec<usize> = dims.iter().map(|d| f.size_of(d).unwrap_or(1)).collect();
    t.into_shape_with_order(IxDyn(&shape)).map_err(|e| Error::ShapeMismatch(e.to_string()))
}

impl FactorBackend for DenseBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn factor_from_log_prob(&self, dims: Vec<String>, data: Tensor) -> Result<Factor> {
        Factor::new(dims, data)
    }

    fn product(&self, factors: &[Factor]) -> Result<Factor> {
        let mut dims: Vec<String> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        for f in factors {
            for d in f.dims() {
                let size = f.size_of(d).unwrap_or(1);
                match dims.iter().position(|x| x == d) {
                    Some(i) if sizes[i] != size => {
                        return Err(Error::ShapeMismatch(format!(
                            "dim '{}' has size {} and {} in the same product",
                            d, sizes[i], size
                        )));
                    }
                    Some(_) => {}
                    None => {
                        dims.push(d.clone());
                        sizes.push(size);
                    }
                }
            }
        }

        let mut out = full(&sizes, 0.0);
        for f in factors {
            let aligned = align(f, &dims)?;
            out += &aligned;
        }
        Factor::new(dims, out)
    }

    fn eliminate(&self, factor: &Factor, dim: &str, op: ReduceOp) -> Result<Factor> {
        let axis = factor.axis_of(dim).ok_or_else(|| {
            Error::ShapeMismatch(format!("cannot eliminate '{}': factor spans {:?}", dim, factor.dims()))
        })?;
        let data = match op {
            ReduceOp::LogSumExp => logsumexp_axis(factor.data(), axis)?,
            ReduceOp::Sum => factor.data().sum_axis(Axis(axis)),
        };
        let dims = factor.dims().iter().filter(|d| d.as_str() != dim).cloned().collect();
        Factor::new(dims, data)
    }
}
