//! Log-space factors over named dimensions.

use ndarray::IxDyn;
use pp_core::tensor::scalar;
use pp_core::{Error, Result, Tensor};

/// A log-density table whose axes are named.
///
/// Axis `i` of `data` is the dimension `dims[i]`. Names are either
/// enumerated site names or plate names.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    dims: Vec<String>,
    data: Tensor,
}

impl Factor {
    /// Wrap `data`, naming its axes in order.
    pub fn new(dims: Vec<String>, data: Tensor) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(Error::ShapeMismatch(format!(
                "{} dim names for a {}-d table",
                dims.len(),
                data.ndim()
            )));
        }
        for (i, d) in dims.iter().enumerate() {
            if dims[..i].contains(d) {
                return Err(Error::ShapeMismatch(format!("dim '{}' appears twice", d)));
            }
        }
        Ok(Self { dims, data })
    }

    /// Zero-dimensional factor.
    pub fn scalar(value: f64) -> Self {
        Self { dims: Vec::new(), data: scalar(value) }
    }

    /// Named positional tensor to factor. The first `names.len()` axes of
    /// `t` are named; any further axes are rejected.
    pub fn from_tensor(names: &[&str], t: Tensor) -> Result<Self> {
        Self::new(names.iter().map(|s| s.to_string()).collect(), t)
    }

    /// Dim names, in axis order.
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Underlying table.
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    /// Axis position of `dim`.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Size of `dim`, if present.
    pub fn size_of(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|a| self.data.shape()[a])
    }

    /// Whether the factor spans `dim`.
    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    /// Factor to positional tensor with axes in `order`.
    ///
    /// `order` must name every dim of the factor exactly once.
    pub fn to_tensor(&self, order: &[&str]) -> Result<Tensor> {
        if order.len() != self.dims.len() {
            return Err(Error::ShapeMismatch(format!(
                "order {:?} does not cover dims {:?}",
                order, self.dims
            )));
        }
        let perm = order
            .iter()
            .map(|name| {
                self.axis_of(name).ok_or_else(|| {
                    Error::ShapeMismatch(format!("factor has no dim '{}' (dims {:?})", name, self.dims))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(self.data.view().permuted_axes(IxDyn(&perm)).as_standard_layout().into_owned())
    }

    /// Single value of a dimensionless factor.
    pub fn value(&self) -> Result<f64> {
        if !self.dims.is_empty() {
            return Err(Error::ShapeMismatch(format!("factor still spans dims {:?}", self.dims)));
        }
        pp_core::tensor::as_scalar(&self.data)
    }
}
