//! JSON distribution descriptions for the CLI.
//!
//! A description is an object tagged by `family`; parameters are numbers or
//! (nested) arrays of numbers:
//!
//! ```json
//! { "family": "normal", "loc": [0.0, 1.0], "scale": 2.0 }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use pp_core::tensor::from_vec;
use pp_core::Tensor;
use pp_prob::*;
use serde::Deserialize;

/// A number or a nested array of numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TensorJson {
    /// 0-d value.
    Scalar(f64),
    /// One more leading axis.
    Array(Vec<TensorJson>),
}

impl TensorJson {
    fn shape(&self) -> Vec<usize> {
        match self {
            TensorJson::Scalar(_) => Vec::new(),
            TensorJson::Array(items) => {
                let mut s = vec![items.len()];
                if let Some(first) = items.first() {
                    s.extend(first.shape());
                }
                s
            }
        }
    }

    fn flatten(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
        match (self, shape.split_first()) {
            (TensorJson::Scalar(x), None) => out.push(*x),
            (TensorJson::Array(items), Some((&n, rest))) if items.len() == n => {
                for item in items {
                    item.flatten(rest, out)?;
                }
            }
            _ => bail!("ragged nested array (expected shape {:?})", shape),
        }
        Ok(())
    }

    /// Dense row-major tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let shape = self.shape();
        let mut data = Vec::new();
        self.flatten(&shape, &mut data)?;
        Ok(from_vec(&shape, data)?)
    }
}

/// Supported distribution families.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DistSpec {
    Normal { loc: TensorJson, scale: TensorJson },
    HalfNormal { scale: TensorJson },
    TruncatedNormal { low: TensorJson, loc: TensorJson, scale: TensorJson },
    Cauchy { loc: TensorJson, scale: TensorJson },
    HalfCauchy { scale: TensorJson },
    StudentT { df: TensorJson, loc: TensorJson, scale: TensorJson },
    Gamma { concentration: TensorJson, rate: TensorJson },
    InverseGamma { concentration: TensorJson, rate: TensorJson },
    Chi2 { df: TensorJson },
    Exponential { rate: TensorJson },
    Beta { concentration1: TensorJson, concentration0: TensorJson },
    Dirichlet { concentration: TensorJson },
    Uniform { low: TensorJson, high: TensorJson },
    Pareto { scale: TensorJson, alpha: TensorJson },
    Gumbel { loc: TensorJson, scale: TensorJson },
    LogNormal { loc: TensorJson, scale: TensorJson },
    GaussianRandomWalk { scale: TensorJson, num_steps: usize },
    MultivariateNormal { loc: TensorJson, covariance: TensorJson },
    LkjCholesky { dim: usize, concentration: TensorJson },
    Lkj { dim: usize, concentration: TensorJson },
    Bernoulli { probs: Option<TensorJson>, logits: Option<TensorJson> },
    Binomial { total_count: TensorJson, probs: Option<TensorJson>, logits: Option<TensorJson> },
    Categorical { probs: Option<TensorJson>, logits: Option<TensorJson> },
    Multinomial { total_count: TensorJson, probs: Option<TensorJson>, logits: Option<TensorJson> },
    Poisson { rate: TensorJson },
    ZeroInflatedPoisson { gate: TensorJson, rate: TensorJson },
    BetaBinomial { concentration1: TensorJson, concentration0: TensorJson, total_count: TensorJson },
    GammaPoisson { concentration: TensorJson, rate: TensorJson },
}

enum Param {
    Probs(Tensor),
    Logits(Tensor),
}

fn probs_or_logits(probs: &Option<TensorJson>, logits: &Option<TensorJson>) -> Result<Param> {
    match (probs, logits) {
        (Some(p), None) => Ok(Param::Probs(p.to_tensor()?)),
        (None, Some(l)) => Ok(Param::Logits(l.to_tensor()?)),
        _ => bail!("exactly one of `probs` or `logits` must be given"),
    }
}

impl DistSpec {
    /// Read a description from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Construct the distribution; parameter checks happen here.
    pub fn build(&self) -> Result<DistRef> {
        use DistSpec as D;
        let d: DistRef = match self {
            D::Normal { loc, scale } => Arc::new(Normal::new(loc.to_tensor()?, scale.to_tensor()?)?),
            D::HalfNormal { scale } => Arc::new(HalfNormal::new(scale.to_tensor()?)?),
            D::TruncatedNormal { low, loc, scale } => {
                Arc::new(TruncatedNormal::new(low.to_tensor()?, loc.to_tensor()?, scale.to_tensor()?)?)
            }
            D::Cauchy { loc, scale } => Arc::new(Cauchy::new(loc.to_tensor()?, scale.to_tensor()?)?),
            D::HalfCauchy { scale } => Arc::new(HalfCauchy::new(scale.to_tensor()?)?),
            D::StudentT { df, loc, scale } => {
                Arc::new(StudentT::new(df.to_tensor()?, loc.to_tensor()?, scale.to_tensor()?)?)
            }
            D::Gamma { concentration, rate } => Arc::new(Gamma::new(concentration.to_tensor()?, rate.to_tensor()?)?),
            D::InverseGamma { concentration, rate } => {
                Arc::new(InverseGamma::new(concentration.to_tensor()?, rate.to_tensor()?)?)
            }
            D::Chi2 { df } => Arc::new(Chi2::new(df.to_tensor()?)?),
            D::Exponential { rate } => Arc::new(Exponential::new(rate.to_tensor()?)?),
            D::Beta { concentration1, concentration0 } => {
                Arc::new(Beta::new(concentration1.to_tensor()?, concentration0.to_tensor()?)?)
            }
            D::Dirichlet { concentration } => Arc::new(Dirichlet::new(concentration.to_tensor()?)?),
            D::Uniform { low, high } => Arc::new(Uniform::new(low.to_tensor()?, high.to_tensor()?)?),
            D::Pareto { scale, alpha } => Arc::new(Pareto::new(scale.to_tensor()?, alpha.to_tensor()?)?),
            D::Gumbel { loc, scale } => Arc::new(Gumbel::new(loc.to_tensor()?, scale.to_tensor()?)?),
            D::LogNormal { loc, scale } => Arc::new(LogNormal::new(loc.to_tensor()?, scale.to_tensor()?)?),
            D::GaussianRandomWalk { scale, num_steps } => {
                Arc::new(GaussianRandomWalk::new(scale.to_tensor()?, *num_steps)?)
            }
            D::MultivariateNormal { loc, covariance } => {
                Arc::new(MultivariateNormal::from_covariance(loc.to_tensor()?, covariance.to_tensor()?)?)
            }
            D::LkjCholesky { dim, concentration } => Arc::new(LKJCholesky::new(*dim, concentration.to_tensor()?)?),
            D::Lkj { dim, concentration } => Arc::new(LKJ::new(*dim, concentration.to_tensor()?)?),
            D::Bernoulli { probs, logits } => match probs_or_logits(probs, logits)? {
                Param::Probs(p) => Arc::new(Bernoulli::from_probs(p)?),
                Param::Logits(l) => Arc::new(Bernoulli::from_logits(l)?),
            },
            D::Binomial { total_count, probs, logits } => {
                let n = total_count.to_tensor()?;
                match probs_or_logits(probs, logits)? {
                    Param::Probs(p) => Arc::new(Binomial::from_probs(n, p)?),
                    Param::Logits(l) => Arc::new(Binomial::from_logits(n, l)?),
                }
            }
            D::Categorical { probs, logits } => match probs_or_logits(probs, logits)? {
                Param::Probs(p) => Arc::new(Categorical::from_probs(p)?),
                Param::Logits(l) => Arc::new(Categorical::from_logits(l)?),
            },
            D::Multinomial { total_count, probs, logits } => {
                let n = total_count.to_tensor()?;
                match probs_or_logits(probs, logits)? {
                    Param::Probs(p) => Arc::new(Multinomial::from_probs(n, p)?),
                    Param::Logits(l) => Arc::new(Multinomial::from_logits(n, l)?),
                }
            }
            D::Poisson { rate } => Arc::new(Poisson::new(rate.to_tensor()?)?),
            D::ZeroInflatedPoisson { gate, rate } => {
                Arc::new(ZeroInflatedPoisson::new(gate.to_tensor()?, rate.to_tensor()?)?)
            }
            D::BetaBinomial { concentration1, concentration0, total_count } => Arc::new(BetaBinomial::new(
                concentration1.to_tensor()?,
                concentration0.to_tensor()?,
                total_count.to_tensor()?,
            )?),
            D::GammaPoisson { concentration, rate } => {
                Arc::new(GammaPoisson::new(concentration.to_tensor()?, rate.to_tensor()?)?)
            }
        };
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_arrays_to_tensor() {
        let t: TensorJson = serde_json::from_str("[[1, 2, 3], [4, 5, 6]]").unwrap();
        let t = t.to_tensor().unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t[[1, 0]], 4.0);

        let ragged: TensorJson = serde_json::from_str("[[1, 2], [3]]").unwrap();
        assert!(ragged.to_tensor().is_err());
    }

    #[test]
    fn test_build_from_json() {
        let spec: DistSpec =
            serde_json::from_str(r#"{"family": "binomial", "total_count": 5, "logits": [0.0, 1.0]}"#).unwrap();
        let d = spec.build().unwrap();
        assert_eq!(d.name(), "Binomial");
        assert_eq!(d.batch_shape(), &[2]);

        let both: DistSpec =
            serde_json::from_str(r#"{"family": "bernoulli", "probs": 0.5, "logits": 0.0}"#).unwrap();
        assert!(both.build().is_err());

        let bad: DistSpec =
            serde_json::from_str(r#"{"family": "beta_binomial", "concentration1": -1, "concentration0": 1, "total_count": 3}"#)
                .unwrap();
        assert!(bad.build().is_err());
    }
}
