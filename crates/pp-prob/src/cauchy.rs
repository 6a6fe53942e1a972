//! Cauchy family: `Cauchy`, `HalfCauchy`, `TruncatedCauchy`.

use std::f64::consts::PI;

use pp_core::tensor::{try_map2, try_map3, try_map4};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;
use rand_distr::Distribution as RandDistribution;

use crate::constraints::Constraint;
use crate::distribution::{check_param, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::LN_PI;

/// Log-PDF of `Cauchy(loc, scale)` at `x`.
pub fn logpdf(x: f64, loc: f64, scale: f64) -> Result<f64> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidParameter(format!("scale must be finite and > 0, got {}", scale)));
    }
    let z = (x - loc) / scale;
    Ok(-LN_PI - scale.ln() - (z * z).ln_1p())
}

/// `P(X > x)` of the standard Cauchy.
fn std_sf(z: f64) -> f64 {
    0.5 - z.atan() / PI
}

/// `Cauchy(loc, scale)`.
#[derive(Debug, Clone)]
pub struct Cauchy {
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl Cauchy {
    /// Create a batched Cauchy.
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&loc, &scale])?;
        Ok(Self { loc, scale, batch_shape })
    }
}

impl Distribution for Cauchy {
    fn name(&self) -> &'static str {
        "Cauchy"
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
            let d = rand_distr::Cauchy::new(p[0], p[1])
                .map_err(|e| Error::InvalidParameter(format!("cauchy: {}", e)))?;
            Ok(d.sample(rng))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.loc, &self.scale, logpdf)
    }
}

/// `|X|` for `X ~ Cauchy(0, scale)`.
#[derive(Debug, Clone)]
pub struct HalfCauchy {
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl HalfCauchy {
    /// Create a half-Cauchy.
    pub fn new(scale: Tensor) -> Result<Self> {
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = scale.shape().to_vec();
        Ok(Self { scale, batch_shape })
    }
}

impl Distribution for HalfCauchy {
    fn name(&self) -> &'static str {
        "HalfCauchy"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::Positive
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("scale", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        sample_elementwise(key, &self.shape(sample_shape), &[&self.scale], |rng, p| {
            let u: f64 = rng.random_range(0.0..1.0);
            Ok((p[0] * (0.5 * PI * u).tan()).max(f64::MIN_POSITIVE))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map2(value, &self.scale, |x, s| Ok(std::f64::consts::LN_2 + logpdf(x, 0.0, s)?))
    }
}

/// `Cauchy(loc, scale)` conditioned on `x > low`.
#[derive(Debug, Clone)]
pub struct TruncatedCauchy {
    low: Tensor,
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl TruncatedCauchy {
    /// Lower-truncated Cauchy.
    pub fn new(low: Tensor, loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("low", &Constraint::Real, &low)?;
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&low, &loc, &scale])?;
        Ok(Self { low, loc, scale, batch_shape })
    }
}

impl Distribution for TruncatedCauchy {
    fn name(&self) -> &'static str {
        "TruncatedCauchy"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::GreaterThan(self.low.clone())
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("low", Constraint::Real), ("loc", Constraint::Real), ("scale", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let params = [&self.low, &self.loc, &self.scale];
        sample_elementwise(key, &self.shape(sample_shape), &params, |rng, p| {
            let (low, loc, scale) = (p[0], p[1], p[2]);
            let sf = std_sf((low - loc) / scale);
            let u: f64 = rng.random_range(f64::EPSILON..1.0);
            let x = loc + scale * (PI * (0.5 - u * sf)).tan();
            Ok(x.max(low + f64::EPSILON * low.abs().max(1.0)))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map4(value, &self.low, &self.loc, &self.scale, |x, low, loc, scale| {
            Ok(logpdf(x, loc, scale)? - std_sf((low - loc) / scale).ln())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar};

    #[test]
    fn test_matches_student_t_with_one_dof() {
        for x in [-3.0, 0.0, 0.4, 7.0] {
            let a = logpdf(x, 0.5, 2.0).unwrap();
            let b = crate::student_t::logpdf(x, 0.5, 2.0, 1.0).unwrap();
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_truncated_at_loc_doubles_density() {
        let d = TruncatedCauchy::new(scalar(1.0), scalar(1.0), scalar(0.5)).unwrap();
        let lp = as_scalar(&d.log_prob(&scalar(2.0)).unwrap()).unwrap();
        assert_relative_eq!(lp, logpdf(2.0, 1.0, 0.5).unwrap() + std::f64::consts::LN_2, epsilon = 1e-12);
        let x = d.sample(PrngKey::new(11), &[300]).unwrap();
        assert!(x.iter().all(|&v| v > 1.0));
    }

    #[test]
    fn test_half_cauchy_support() {
        let d = HalfCauchy::new(scalar(1.0)).unwrap();
        let x = d.sample(PrngKey::new(2), &[200]).unwrap();
        assert!(Constraint::Positive.check_all(&x).unwrap());
        assert!(d.log_prob(&scalar(-0.5)).is_err());
    }
}
