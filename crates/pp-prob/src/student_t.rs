//! Student-t distribution.

use pp_core::tensor::try_map4;
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{check_param, expand, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::LN_PI;

/// Log-PDF of a Student-t distribution at `x` with location `mu`, scale `sigma`, and dof `nu`.
pub fn logpdf(x: f64, mu: f64, sigma: f64, nu: f64) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::InvalidParameter(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    if !nu.is_finite() || nu <= 0.0 {
        return Err(Error::InvalidParameter(format!("nu must be finite and > 0, got {}", nu)));
    }
    let z = (x - mu) / sigma;
    let half_nu = 0.5 * nu;
    let a = ln_gamma(0.5 * (nu + 1.0)) - ln_gamma(half_nu);
    let b = -0.5 * (nu.ln() + LN_PI);
    let c = -sigma.ln();
    let d = -0.5 * (nu + 1.0) * (z * z / nu).ln_1p();
    Ok(a + b + c + d)
}

/// Student-t with `df` degrees of freedom, location `loc` and scale `scale`.
#[derive(Debug, Clone)]
pub struct StudentT {
    df: Tensor,
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl StudentT {
    /// Create a batched Student-t.
    pub fn new(df: Tensor, loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("df", &Constraint::Positive, &df)?;
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&df, &loc, &scale])?;
        Ok(Self { df, loc, scale, batch_shape })
    }
}

impl Distribution for StudentT {
    fn name(&self) -> &'static str {
        "StudentT"
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
        vec![("df", Constraint::Positive), ("loc", Constraint::Real), ("scale", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let params = [&self.df, &self.loc, &self.scale];
        sample_elementwise(key, &self.shape(sample_shape), &params, |rng, p| {
            let t = rand_distr::StudentT::new(p[0])
                .map_err(|e| Error::InvalidParameter(format!("student_t: {}", e)))?;
            Ok(p[1] + p[2] * t.sample(rng))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map4(value, &self.loc, &self.scale, &self.df, logpdf)
    }

    /// Defined for `df > 1`; `NaN` elsewhere.
    fn mean(&self) -> Result<Tensor> {
        let m = pp_core::tensor::try_map2(&self.df, &self.loc, |df, loc| Ok(if df > 1.0 { loc } else { f64::NAN }))?;
        expand(&m, &self.batch_shape)
    }

    fn variance(&self) -> Result<Tensor> {
        let v = pp_core::tensor::try_map2(&self.df, &self.scale, |df, s| {
            Ok(if df > 2.0 {
                s * s * df / (df - 2.0)
            } else if df > 1.0 {
                f64::INFINITY
            } else {
                f64::NAN
            })
        })?;
        expand(&v, &self.batch_shape)
    }
}
