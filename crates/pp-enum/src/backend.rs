//! Factor-algebra backend interface.
//!
//! Enumeration only needs a handful of operations on log-space tables:
//! build one from a log-density, multiply tables (add logs), reduce a dim
//! and read the result back. Backends implement [`FactorBackend`] and are
//! looked up by name with [`backend_by_name`].

use std::fmt;
use std::sync::Arc;

use pp_core::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::factor::Factor;

/// How a dim is reduced away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    /// Marginalize an enumerated variable: `log Σ exp`.
    LogSumExp,
    /// Multiply conditionally independent plate members: `Σ` of logs.
    Sum,
}

/// Sum-product operations over named log-space factors.
pub trait FactorBackend: Send + Sync + fmt::Debug {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Factor from a log-density table whose axes are `dims`.
    fn factor_from_log_prob(&self, dims: Vec<String>, data: Tensor) -> Result<Factor>;

    /// Pointwise product (sum of logs) over the union of dims.
    fn product(&self, factors: &[Factor]) -> Result<Factor>;

    /// Reduce `dim` away with `op`.
    fn eliminate(&self, factor: &Factor, dim: &str, op: ReduceOp) -> Result<Factor>;

    /// Positional data with axes in `order`.
    fn to_data(&self, factor: &Factor, order: &[&str]) -> Result<Tensor> {
        factor.to_tensor(order)
    }

    /// Constant factor.
    fn scalar(&self, value: f64) -> Factor {
        Factor::scalar(value)
    }
}

/// Shared backend handle.
pub type BackendRef = Arc<dyn FactorBackend>;

/// Backends compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut names = Vec::new();
    #[cfg(feature = "dense-backend")]
    names.push(crate::dense::DenseBackend::NAME);
    names
}

/// Look a backend up by name.
pub fn backend_by_name(name: &str) -> Result<BackendRef> {
    match name {
        #[cfg(feature = "dense-backend")]
        crate::dense::DenseBackend::NAME => Ok(Arc::new(crate::dense::DenseBackend)),
        other => Err(Error::BackendUnavailable(format!(
            "no factor backend named '{}' (available: {:?})",
            other,
            available_backends()
        ))),
    }
}
