//! Normal family: `Normal`, `HalfNormal`, `TruncatedNormal`.

use pp_core::tensor::{try_map1, try_map2, try_map3, try_map4};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand::Rng;
use rand_distr::Distribution as RandDistribution;
use rand_distr::StandardNormal;

use crate::constraints::Constraint;
use crate::distribution::{check_param, expand, params_shape, sample_elementwise, validate_value, Distribution};
use crate::math::{std_normal_icdf, std_normal_log_sf, LN_SQRT_2PI};

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::InvalidParameter(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Negative log-likelihood for a Normal distribution `N(mu, sigma)` at `x`.
pub fn nll(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    Ok(-logpdf(x, mu, sigma)?)
}

/// `N(loc, scale)`.
#[derive(Debug, Clone)]
pub struct Normal {
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl Normal {
    /// Create a batched Normal; parameters broadcast against each other.
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&loc, &scale])?;
        Ok(Self { loc, scale, batch_shape })
    }

    /// Location.
    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    /// Scale.
    pub fn scale(&self) -> &Tensor {
        &self.scale
    }
}

impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "Normal"
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
            let z: f64 = StandardNormal.sample(rng);
            Ok(p[0] + p[1] * z)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.loc, &self.scale, logpdf)
    }

    fn mean(&self) -> Result<Tensor> {
        expand(&self.loc, &self.batch_shape)
    }

    fn variance(&self) -> Result<Tensor> {
        expand(&self.scale.mapv(|s| s * s), &self.batch_shape)
    }
}

/// `|X|` for `X ~ N(0, scale)`.
#[derive(Debug, Clone)]
pub struct HalfNormal {
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl HalfNormal {
    /// Create a half-normal with the given scale.
    pub fn new(scale: Tensor) -> Result<Self> {
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = scale.shape().to_vec();
        Ok(Self { scale, batch_shape })
    }
}

impl Distribution for HalfNormal {
    fn name(&self) -> &'static str {
        "HalfNormal"
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
            let z: f64 = StandardNormal.sample(rng);
            Ok(p[0] * z.abs())
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map2(value, &self.scale, |x, s| Ok(std::f64::consts::LN_2 + logpdf(x, 0.0, s)?))
    }

    fn mean(&self) -> Result<Tensor> {
        try_map1(&self.scale, |s| Ok(s * (2.0 / std::f64::consts::PI).sqrt()))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map1(&self.scale, |s| Ok(s * s * (1.0 - 2.0 / std::f64::consts::PI)))
    }
}

/// `N(loc, scale)` conditioned on `x > low`.
#[derive(Debug, Clone)]
pub struct TruncatedNormal {
    low: Tensor,
    loc: Tensor,
    scale: Tensor,
    batch_shape: Vec<usize>,
}

impl TruncatedNormal {
    /// Lower-truncated Normal.
    pub fn new(low: Tensor, loc: Tensor, scale: Tensor) -> Result<Self> {
        check_param("low", &Constraint::Real, &low)?;
        check_param("loc", &Constraint::Real, &loc)?;
        check_param("scale", &Constraint::Positive, &scale)?;
        let batch_shape = params_shape(&[&low, &loc, &scale])?;
        Ok(Self { low, loc, scale, batch_shape })
    }
}

impl Distribution for TruncatedNormal {
    fn name(&self) -> &'static str {
        "TruncatedNormal"
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
            let sf = std_normal_log_sf((low - loc) / scale).exp();
            // Invert the survival function: stays accurate deep in the right tail.
            let u: f64 = rng.random_range(f64::EPSILON..1.0);
            let x = loc - scale * std_normal_icdf(u * sf);
            Ok(x.max(low + f64::EPSILON * low.abs().max(1.0)))
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map4(value, &self.low, &self.loc, &self.scale, |x, low, loc, scale| {
            Ok(logpdf(x, loc, scale)? - std_normal_log_sf((low - loc) / scale))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::sample_mean;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_standard_at_zero() {
        let lp = logpdf(0.0, 0.0, 1.0).unwrap();
        assert!((lp + LN_SQRT_2PI).abs() < 1e-12);
    }

    #[test]
    fn test_symmetry() {
        let lp1 = logpdf(1.3, 0.0, 2.0).unwrap();
        let lp2 = logpdf(-1.3, 0.0, 2.0).unwrap();
        assert!((lp1 - lp2).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_sigma() {
        assert!(logpdf(0.0, 0.0, 0.0).is_err());
        assert!(logpdf(0.0, 0.0, -1.0).is_err());
        assert!(matches!(Normal::new(scalar(0.0), scalar(-1.0)), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_batched_log_prob_shape() {
        let d = Normal::new(vector(&[0.0, 1.0, 2.0]), scalar(1.0)).unwrap();
        assert_eq!(d.batch_shape(), &[3]);
        let lp = d.log_prob(&scalar(1.0)).unwrap();
        assert_eq!(lp.shape(), &[3]);
        assert_relative_eq!(lp[[1]], -LN_SQRT_2PI, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_shape_and_moments() {
        let d = Normal::new(vector(&[-3.0, 5.0]), vector(&[0.5, 2.0])).unwrap();
        let x = d.sample(PrngKey::new(7), &[4000]).unwrap();
        assert_eq!(x.shape(), &[4000, 2]);
        let m = sample_mean(&x);
        assert!((m[0] + 3.0).abs() < 0.05, "mean {}", m[0]);
        assert!((m[1] - 5.0).abs() < 0.15, "mean {}", m[1]);
    }

    #[test]
    fn test_half_normal_doubles_density() {
        let d = HalfNormal::new(scalar(2.0)).unwrap();
        let lp = as_scalar(&d.log_prob(&scalar(1.0)).unwrap()).unwrap();
        assert_relative_eq!(lp, std::f64::consts::LN_2 + logpdf(1.0, 0.0, 2.0).unwrap(), epsilon = 1e-12);
        assert!(matches!(d.log_prob(&scalar(-1.0)), Err(Error::ConstraintViolation(_))));
    }

    #[test]
    fn test_truncated_normal_samples_respect_bound() {
        let d = TruncatedNormal::new(scalar(2.5), scalar(0.0), scalar(1.0)).unwrap();
        let x = d.sample(PrngKey::new(3), &[500]).unwrap();
        assert!(x.iter().all(|&v| v > 2.5));
        // Zero truncation mass below the mean halves the normaliser.
        let d0 = TruncatedNormal::new(scalar(0.0), scalar(0.0), scalar(1.0)).unwrap();
        let lp = as_scalar(&d0.log_prob(&scalar(0.3)).unwrap()).unwrap();
        assert_relative_eq!(lp, logpdf(0.3, 0.0, 1.0).unwrap() + std::f64::consts::LN_2, epsilon = 1e-12);
    }
}
