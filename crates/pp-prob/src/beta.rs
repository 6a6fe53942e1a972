//! Beta and Dirichlet distributions.

use pp_core::tensor::{event_chunks, extended_shape, from_vec, try_map2, try_map3};
use pp_core::{Error, PrngKey, Result, Tensor};
use rand_distr::Distribution as RandDistribution;
use statrs::function::gamma::ln_gamma;

use crate::constraints::Constraint;
use crate::distribution::{
    batch_rows, check_param, params_shape, sample_elementwise, sample_events, validate_value, Distribution,
};
use crate::math::{ln_beta, require_positive, xlogy};

/// Log-PDF of a Beta(`a`, `b`) distribution at `x`.
///
/// Support: `0 <= x <= 1`.
pub fn logpdf(x: f64, a: f64, b: f64) -> Result<f64> {
    let a = require_positive("a", a)?;
    let b = require_positive("b", b)?;
    if !(0.0..=1.0).contains(&x) {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(xlogy(a - 1.0, x) + xlogy(b - 1.0, 1.0 - x) - ln_beta(a, b))
}

/// Draw from `Beta(a, b)`.
pub(crate) fn draw<R: rand::Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> Result<f64> {
    let d = rand_distr::Beta::new(a, b).map_err(|e| Error::InvalidParameter(format!("beta: {}", e)))?;
    Ok(d.sample(rng))
}

/// `Beta(concentration1, concentration0)`.
#[derive(Debug, Clone)]
pub struct Beta {
    concentration1: Tensor,
    concentration0: Tensor,
    batch_shape: Vec<usize>,
}

impl Beta {
    /// `concentration1` weights `x`, `concentration0` weights `1 - x`.
    pub fn new(concentration1: Tensor, concentration0: Tensor) -> Result<Self> {
        check_param("concentration1", &Constraint::Positive, &concentration1)?;
        check_param("concentration0", &Constraint::Positive, &concentration0)?;
        let batch_shape = params_shape(&[&concentration1, &concentration0])?;
        Ok(Self { concentration1, concentration0, batch_shape })
    }

    /// Weight of `x`.
    pub fn concentration1(&self) -> &Tensor {
        &self.concentration1
    }

    /// Weight of `1 - x`.
    pub fn concentration0(&self) -> &Tensor {
        &self.concentration0
    }
}

impl Distribution for Beta {
    fn name(&self) -> &'static str {
        "Beta"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &[]
    }
    fn support(&self) -> Constraint {
        Constraint::UnitInterval
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration1", Constraint::Positive), ("concentration0", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let params = [&self.concentration1, &self.concentration0];
        sample_elementwise(key, &self.shape(sample_shape), &params, |rng, p| draw(rng, p[0], p[1]))
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        validate_value(self, value)?;
        try_map3(value, &self.concentration1, &self.concentration0, logpdf)
    }

    fn mean(&self) -> Result<Tensor> {
        try_map2(&self.concentration1, &self.concentration0, |a, b| Ok(a / (a + b)))
    }

    fn variance(&self) -> Result<Tensor> {
        try_map2(&self.concentration1, &self.concentration0, |a, b| {
            let t = a + b;
            Ok(a * b / (t * t * (t + 1.0)))
        })
    }
}

/// `Dirichlet(concentration)` over the simplex; the last dim of
/// `concentration` is the event.
#[derive(Debug, Clone)]
pub struct Dirichlet {
    concentration: Tensor,
    batch_shape: Vec<usize>,
    event_shape: Vec<usize>,
}

impl Dirichlet {
    /// Create a Dirichlet; `concentration` needs at least one dim.
    pub fn new(concentration: Tensor) -> Result<Self> {
        if concentration.ndim() == 0 {
            return Err(Error::InvalidParameter("Dirichlet concentration must be at least 1-d".into()));
        }
        check_param("concentration", &Constraint::Positive, &concentration)?;
        let shape = concentration.shape();
        let batch_shape = shape[..shape.len() - 1].to_vec();
        let event_shape = vec![shape[shape.len() - 1]];
        Ok(Self { concentration, batch_shape, event_shape })
    }
}

impl Distribution for Dirichlet {
    fn name(&self) -> &'static str {
        "Dirichlet"
    }
    fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }
    fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }
    fn support(&self) -> Constraint {
        Constraint::Simplex
    }
    fn arg_constraints(&self) -> Vec<(&'static str, Constraint)> {
        vec![("concentration", Constraint::Positive)]
    }

    fn sample(&self, key: PrngKey, sample_shape: &[usize]) -> Result<Tensor> {
        let (_, rows) = event_chunks(&self.concentration, 1)?;
        let batch_out = extended_shape(sample_shape, &self.batch_shape, &[]);
        // Sample dims lead, so position `i` uses batch row `i % rows`.
        let n_rows = rows.len();
        sample_events(key, &batch_out, &self.event_shape, |rng, i| {
            let mut g = rows[i % n_rows]
                .iter()
                .map(|&a| crate::gamma::draw(rng, a, 1.0))
                .collect::<Result<Vec<f64>>>()?;
            let total: f64 = g.iter().sum();
            g.iter_mut().for_each(|x| *x /= total);
            Ok(g)
        })
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch = validate_value(self, value)?;
        let xs = batch_rows(value, &batch, 1)?;
        let alphas = batch_rows(&self.concentration, &batch, 1)?;
        let data = xs
            .iter()
            .zip(&alphas)
            .map(|(x, a)| {
                let a0: f64 = a.iter().sum();
                let norm = ln_gamma(a0) - a.iter().map(|&ai| ln_gamma(ai)).sum::<f64>();
                norm + x.iter().zip(a).map(|(&xi, &ai)| (ai - 1.0) * xi.ln()).sum::<f64>()
            })
            .collect();
        from_vec(&batch, data)
    }

    fn mean(&self) -> Result<Tensor> {
        let k = self.event_shape[0];
        let (_, rows) = event_chunks(&self.concentration, 1)?;
        let data: Vec<f64> = rows
            .iter()
            .flat_map(|r| {
                let t: f64 = r.iter().sum();
                r.iter().map(move |a| a / t).collect::<Vec<_>>()
            })
            .collect();
        let mut shape = self.batch_shape.clone();
        shape.push(k);
        from_vec(&shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::{as_scalar, scalar, vector};

    #[test]
    fn test_beta_one_one_is_flat_over_batch() {
        let d = Beta::new(scalar(1.0), scalar(1.0)).unwrap();
        let lp = d.log_prob(&vector(&[0.0, 0.2, 0.5, 1.0])).unwrap();
        assert_eq!(lp.shape(), &[4]);
        assert!(lp.iter().all(|v| v.abs() < 1e-12), "{:?}", lp);
    }

    #[test]
    fn test_beta_mirror_across_batch() {
        // Beta(a, b) at x equals Beta(b, a) at 1 - x, member by member.
        let d = Beta::new(vector(&[2.0, 0.7]), vector(&[5.0, 3.0])).unwrap();
        let m = Beta::new(vector(&[5.0, 3.0]), vector(&[2.0, 0.7])).unwrap();
        let lp = d.log_prob(&vector(&[0.2, 0.9])).unwrap();
        let lm = m.log_prob(&vector(&[0.8, 0.1])).unwrap();
        for (a, b) in lp.iter().zip(lm.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_relative_eq!(lp[[0]], logpdf(0.2, 2.0, 5.0).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_beta_boundary_and_parameters() {
        let d = Beta::new(vector(&[0.5, 3.0]), scalar(1.0)).unwrap();
        let lp = d.log_prob(&scalar(0.0)).unwrap();
        assert_eq!(lp[[0]], f64::INFINITY);
        assert_eq!(lp[[1]], f64::NEG_INFINITY);
        assert!(matches!(Beta::new(scalar(1.0), scalar(-1.0)), Err(Error::InvalidParameter(_))));
        assert!(matches!(Beta::new(vector(&[1.0, 2.0]), vector(&[1.0, 2.0, 3.0])), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_beta_samples_in_unit_interval() {
        let d = Beta::new(vector(&[0.5, 5.0]), scalar(2.0)).unwrap();
        let x = d.sample(PrngKey::new(1), &[100]).unwrap();
        assert_eq!(x.shape(), &[100, 2]);
        assert!(Constraint::UnitInterval.check_all(&x).unwrap());
    }

    #[test]
    fn test_dirichlet_two_dim_matches_beta() {
        let d = Dirichlet::new(vector(&[2.0, 3.0])).unwrap();
        let lp = as_scalar(&d.log_prob(&vector(&[0.3, 0.7])).unwrap()).unwrap();
        assert_relative_eq!(lp, logpdf(0.3, 2.0, 3.0).unwrap(), epsilon = 1e-10);
    }

    #[test]
    fn test_dirichlet_batched_sample_on_simplex() {
        let alpha = from_vec(&[2, 3], vec![1.0, 1.0, 1.0, 0.2, 5.0, 2.0]).unwrap();
        let d = Dirichlet::new(alpha).unwrap();
        let x = d.sample(PrngKey::new(4), &[10]).unwrap();
        assert_eq!(x.shape(), &[10, 2, 3]);
        assert!(Constraint::Simplex.check_all(&x).unwrap());
        assert_eq!(d.log_prob(&x).unwrap().shape(), &[10, 2]);
        assert!(matches!(d.log_prob(&vector(&[0.5, 0.6, -0.1])), Err(Error::ConstraintViolation(_))));
    }
}
