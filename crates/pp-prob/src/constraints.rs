//! Constraints: admissible domains of parameters and supports.
//!
//! A [`Constraint`] is an immutable description of a domain. Built-in domains
//! form a closed enum; user-defined domains go through [`CustomConstraint`].
//! Bounds are tensors, so a batched distribution can carry batched bounds.
//!
//! `check` returns a boolean mask over the batch part of a value (the value's
//! dims minus the constraint's `event_dim`).

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use ndarray::{ArrayD, IxDyn};
use pp_core::tensor::{batch_part, broadcast_to, event_chunks, numel, scalar, try_map2, try_map3};
use pp_core::{Error, Result, Tensor};

/// Absolute tolerance for sum/normalization checks.
pub const CHECK_TOL: f64 = 1e-6;

type EventPredicate = dyn Fn(&[f64]) -> bool + Send + Sync;

/// User-defined constraint: a named predicate over one event.
#[derive(Clone)]
pub struct CustomConstraint {
    name: Arc<str>,
    event_dim: usize,
    is_discrete: bool,
    predicate: Arc<EventPredicate>,
}

impl CustomConstraint {
    /// Create a custom constraint. `predicate` receives one flattened event.
    pub fn new<F>(name: &str, event_dim: usize, is_discrete: bool, predicate: F) -> Self
    where
        F: Fn(&[f64]) -> bool + Send + Sync + 'static,
    {
        Self { name: Arc::from(name), event_dim, is_discrete, predicate: Arc::new(predicate) }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomConstraint")
            .field("name", &self.name)
            .field("event_dim", &self.event_dim)
            .field("is_discrete", &self.is_discrete)
            .finish()
    }
}

/// Admissible value domain.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// `{0, 1}`.
    Boolean,
    /// Lower Cholesky factors of correlation matrices (unit-norm rows).
    CorrCholesky,
    /// Correlation matrices.
    CorrMatrix,
    /// Support depends on other parameters; cannot be checked or transformed.
    Dependent,
    /// `(lb, inf)`.
    GreaterThan(Tensor),
    /// Integers `>= lb`.
    IntegerGreaterThan(Tensor),
    /// Integers in `[lb, ub]`.
    IntegerInterval(Tensor, Tensor),
    /// `[lb, ub]`.
    Interval(Tensor, Tensor),
    /// `(-inf, ub)`.
    LessThan(Tensor),
    /// Lower-triangular matrices with positive diagonal.
    LowerCholesky,
    /// Non-negative integer vectors summing to `n`.
    Multinomial(Tensor),
    /// Strictly increasing vectors.
    OrderedVector,
    /// `(0, inf)`.
    Positive,
    /// Symmetric positive-definite matrices.
    PositiveDefinite,
    /// Finite reals.
    Real,
    /// Vectors of finite reals.
    RealVector,
    /// Non-negative vectors summing to one.
    Simplex,
    /// `[0, 1]`.
    UnitInterval,
    /// User-defined domain.
    Custom(CustomConstraint),
}

/// Registry key: the constraint's type, without its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// See [`Constraint::Boolean`].
    Boolean,
    /// See [`Constraint::CorrCholesky`].
    CorrCholesky,
    /// See [`Constraint::CorrMatrix`].
    CorrMatrix,
    /// See [`Constraint::Dependent`].
    Dependent,
    /// See [`Constraint::GreaterThan`].
    GreaterThan,
    /// See [`Constraint::IntegerGreaterThan`].
    IntegerGreaterThan,
    /// See [`Constraint::IntegerInterval`].
    IntegerInterval,
    /// See [`Constraint::Interval`].
    Interval,
    /// See [`Constraint::LessThan`].
    LessThan,
    /// See [`Constraint::LowerCholesky`].
    LowerCholesky,
    /// See [`Constraint::Multinomial`].
    Multinomial,
    /// See [`Constraint::OrderedVector`].
    OrderedVector,
    /// See [`Constraint::Positive`].
    Positive,
    /// See [`Constraint::PositiveDefinite`].
    PositiveDefinite,
    /// See [`Constraint::Real`].
    Real,
    /// See [`Constraint::RealVector`].
    RealVector,
    /// See [`Constraint::Simplex`].
    Simplex,
    /// See [`Constraint::UnitInterval`].
    UnitInterval,
    /// A user-defined constraint, keyed by name.
    Custom(Arc<str>),
}

impl ConstraintKind {
    /// Snake-case name used in messages and the CLI.
    pub fn name(&self) -> &str {
        match self {
            ConstraintKind::Boolean => "boolean",
            ConstraintKind::CorrCholesky => "corr_cholesky",
            ConstraintKind::CorrMatrix => "corr_matrix",
            ConstraintKind::Dependent => "dependent",
            ConstraintKind::GreaterThan => "greater_than",
            ConstraintKind::IntegerGreaterThan => "integer_greater_than",
            ConstraintKind::IntegerInterval => "integer_interval",
            ConstraintKind::Interval => "interval",
            ConstraintKind::LessThan => "less_than",
            ConstraintKind::LowerCholesky => "lower_cholesky",
            ConstraintKind::Multinomial => "multinomial",
            ConstraintKind::OrderedVector => "ordered_vector",
            ConstraintKind::Positive => "positive",
            ConstraintKind::PositiveDefinite => "positive_definite",
            ConstraintKind::Real => "real",
            ConstraintKind::RealVector => "real_vector",
            ConstraintKind::Simplex => "simplex",
            ConstraintKind::UnitInterval => "unit_interval",
            ConstraintKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Constraint {
    /// `(lb, inf)`.
    pub fn greater_than(lb: f64) -> Self {
        Constraint::GreaterThan(scalar(lb))
    }

    /// `(-inf, ub)`.
    pub fn less_than(ub: f64) -> Self {
        Constraint::LessThan(scalar(ub))
    }

    /// `[lb, ub]`.
    pub fn interval(lb: f64, ub: f64) -> Self {
        Constraint::Interval(scalar(lb), scalar(ub))
    }

    /// Integers in `[lb, ub]`.
    pub fn integer_interval(lb: f64, ub: f64) -> Self {
        Constraint::IntegerInterval(scalar(lb), scalar(ub))
    }

    /// Integers `>= 0`.
    pub fn nonnegative_integer() -> Self {
        Constraint::IntegerGreaterThan(scalar(0.0))
    }

    /// Integers `>= 1`.
    pub fn positive_integer() -> Self {
        Constraint::IntegerGreaterThan(scalar(1.0))
    }

    /// Non-negative integer vectors summing to `n`.
    pub fn multinomial(n: f64) -> Self {
        Constraint::Multinomial(scalar(n))
    }

    /// Registry key.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Boolean => ConstraintKind::Boolean,
            Constraint::CorrCholesky => ConstraintKind::CorrCholesky,
            Constraint::CorrMatrix => ConstraintKind::CorrMatrix,
            Constraint::Dependent => ConstraintKind::Dependent,
            Constraint::GreaterThan(_) => ConstraintKind::GreaterThan,
            Constraint::IntegerGreaterThan(_) => ConstraintKind::IntegerGreaterThan,
            Constraint::IntegerInterval(..) => ConstraintKind::IntegerInterval,
            Constraint::Interval(..) => ConstraintKind::Interval,
            Constraint::LessThan(_) => ConstraintKind::LessThan,
            Constraint::LowerCholesky => ConstraintKind::LowerCholesky,
            Constraint::Multinomial(_) => ConstraintKind::Multinomial,
            Constraint::OrderedVector => ConstraintKind::OrderedVector,
            Constraint::Positive => ConstraintKind::Positive,
            Constraint::PositiveDefinite => ConstraintKind::PositiveDefinite,
            Constraint::Real => ConstraintKind::Real,
            Constraint::RealVector => ConstraintKind::RealVector,
            Constraint::Simplex => ConstraintKind::Simplex,
            Constraint::UnitInterval => ConstraintKind::UnitInterval,
            Constraint::Custom(c) => ConstraintKind::Custom(c.name.clone()),
        }
    }

    /// Whether the domain is countable.
    pub fn is_discrete(&self) -> bool {
        match self {
            Constraint::Boolean
            | Constraint::IntegerGreaterThan(_)
            | Constraint::IntegerInterval(..)
            | Constraint::Multinomial(_) => true,
            Constraint::Custom(c) => c.is_discrete,
            _ => false,
        }
    }

    /// Number of rightmost dims forming one event.
    pub fn event_dim(&self) -> usize {
        match self {
            Constraint::Multinomial(_)
            | Constraint::OrderedVector
            | Constraint::RealVector
            | Constraint::Simplex => 1,
            Constraint::CorrCholesky
            | Constraint::CorrMatrix
            | Constraint::LowerCholesky
            | Constraint::PositiveDefinite => 2,
            Constraint::Custom(c) => c.event_dim,
            _ => 0,
        }
    }

    /// Boolean mask over the batch part of `value`.
    pub fn check(&self, value: &Tensor) -> Result<ArrayD<bool>> {
        let as_mask = |t: Tensor| t.mapv(|v| v != 0.0);
        let flag = |b: bool| Ok(if b { 1.0 } else { 0.0 });
        match self {
            Constraint::Boolean => Ok(value.mapv(|x| x == 0.0 || x == 1.0)),
            Constraint::Real => Ok(value.mapv(f64::is_finite)),
            Constraint::Positive => Ok(value.mapv(|x| x > 0.0 && x < f64::INFINITY)),
            Constraint::UnitInterval => Ok(value.mapv(|x| (0.0..=1.0).contains(&x))),
            Constraint::GreaterThan(lb) => {
                Ok(as_mask(try_map2(value, lb, |x, lb| flag(x > lb && x < f64::INFINITY))?))
            }
            Constraint::LessThan(ub) => {
                Ok(as_mask(try_map2(value, ub, |x, ub| flag(x < ub && x > f64::NEG_INFINITY))?))
            }
            Constraint::Interval(lb, ub) => {
                Ok(as_mask(try_map3(value, lb, ub, |x, lb, ub| flag(x >= lb && x <= ub))?))
            }
            Constraint::IntegerGreaterThan(lb) => Ok(as_mask(try_map2(value, lb, |x, lb| {
                flag(x.is_finite() && x.fract() == 0.0 && x >= lb)
            })?)),
            Constraint::IntegerInterval(lb, ub) => Ok(as_mask(try_map3(value, lb, ub, |x, lb, ub| {
                flag(x.fract() == 0.0 && x >= lb && x <= ub)
            })?)),
            Constraint::RealVector => check_events(value, 1, |e| e.iter().all(|x| x.is_finite())),
            Constraint::Simplex => check_events(value, 1, |e| {
                e.iter().all(|&x| x >= 0.0) && (e.iter().sum::<f64>() - 1.0).abs() < CHECK_TOL
            }),
            Constraint::OrderedVector => {
                check_events(value, 1, |e| e.windows(2).all(|w| w[0] < w[1]) && e.iter().all(|x| x.is_finite()))
            }
            Constraint::Multinomial(n) => {
                let batch = batch_part(value.shape(), 1)?.to_vec();
                let totals = flat_broadcast(n, &batch)?;
                let (_, events) = event_chunks(value, 1)?;
                let data: Vec<bool> = events
                    .iter()
                    .zip(totals)
                    .map(|(e, total)| {
                        e.iter().all(|&x| x >= 0.0 && x.fract() == 0.0) && e.iter().sum::<f64>() == total
                    })
                    .collect();
                mask_from_vec(&batch, data)
            }
            Constraint::LowerCholesky => check_matrices(value, |m| is_lower_cholesky(m)),
            Constraint::CorrCholesky => check_matrices(value, |m| {
                is_lower_cholesky(m)
                    && m.row_iter().all(|r| (r.norm_squared() - 1.0).abs() < CHECK_TOL)
            }),
            Constraint::PositiveDefinite => {
                check_matrices(value, |m| is_symmetric(m) && m.clone().cholesky().is_some())
            }
            Constraint::CorrMatrix => check_matrices(value, |m| {
                is_symmetric(m)
                    && m.diagonal().iter().all(|d| (d - 1.0).abs() < CHECK_TOL)
                    && m.clone().cholesky().is_some()
            }),
            Constraint::Custom(c) => check_events(value, c.event_dim, |e| (c.predicate)(e)),
            Constraint::Dependent => Err(Error::NotImplemented(
                "a dependent constraint has no fixed domain to check".into(),
            )),
        }
    }

    /// `true` when every batch element satisfies the constraint.
    pub fn check_all(&self, value: &Tensor) -> Result<bool> {
        Ok(self.check(value)?.iter().all(|&b| b))
    }

    /// Runtime support check: [`Error::ConstraintViolation`] on failure.
    pub fn validate(&self, value: &Tensor, what: &str) -> Result<()> {
        if self.check_all(value)? {
            Ok(())
        } else {
            Err(Error::ConstraintViolation(format!("{} does not satisfy {}", what, self)))
        }
    }

    /// Construction-time parameter check: [`Error::InvalidParameter`] on failure.
    pub fn validate_param(&self, name: &str, value: &Tensor) -> Result<()> {
        if self.check_all(value)? {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "{} must satisfy {}, got {}",
                name,
                self,
                short_repr(value)
            )))
        }
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constraint::GreaterThan(a), Constraint::GreaterThan(b))
            | (Constraint::LessThan(a), Constraint::LessThan(b))
            | (Constraint::IntegerGreaterThan(a), Constraint::IntegerGreaterThan(b))
            | (Constraint::Multinomial(a), Constraint::Multinomial(b)) => a == b,
            (Constraint::Interval(a0, a1), Constraint::Interval(b0, b1))
            | (Constraint::IntegerInterval(a0, a1), Constraint::IntegerInterval(b0, b1)) => {
                a0 == b0 && a1 == b1
            }
            (Constraint::Custom(a), Constraint::Custom(b)) => a.name == b.name,
            (a, b) => a.kind() == b.kind(),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Constraint::GreaterThan(t)
            | Constraint::LessThan(t)
            | Constraint::IntegerGreaterThan(t)
            | Constraint::Multinomial(t) => write!(f, "{}({})", kind, short_repr(t)),
            Constraint::Interval(a, b) | Constraint::IntegerInterval(a, b) => {
                write!(f, "{}({}, {})", kind, short_repr(a), short_repr(b))
            }
            _ => write!(f, "{}", kind),
        }
    }
}

fn short_repr(t: &Tensor) -> String {
    if t.len() == 1 {
        format!("{}", t.iter().next().copied().unwrap_or(f64::NAN))
    } else {
        format!("tensor{:?}", t.shape())
    }
}

/// Broadcast `t` to `shape` and flatten in row-major order.
pub(crate) fn flat_broadcast(t: &Tensor, shape: &[usize]) -> Result<Vec<f64>> {
    Ok(broadcast_to(t, shape)?.iter().copied().collect())
}

fn mask_from_vec(shape: &[usize], data: Vec<bool>) -> Result<ArrayD<bool>> {
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| Error::ShapeMismatch(format!("mask of shape {:?}: {}", shape, e)))
}

fn check_events<F>(value: &Tensor, event_dim: usize, pred: F) -> Result<ArrayD<bool>>
where
    F: Fn(&[f64]) -> bool,
{
    let (batch, events) = event_chunks(value, event_dim)?;
    mask_from_vec(&batch, events.iter().map(|e| pred(e)).collect())
}

fn check_matrices<F>(value: &Tensor, pred: F) -> Result<ArrayD<bool>>
where
    F: Fn(&DMatrix<f64>) -> bool,
{
    let shape = value.shape();
    if shape.len() < 2 || shape[shape.len() - 1] != shape[shape.len() - 2] {
        return Err(Error::ShapeMismatch(format!("expected square matrices, got shape {:?}", shape)));
    }
    let n = shape[shape.len() - 1];
    let (batch, events) = event_chunks(value, 2)?;
    debug_assert_eq!(events.len(), numel(&batch));
    let data = events.iter().map(|e| pred(&DMatrix::from_row_slice(n, n, e))).collect();
    mask_from_vec(&batch, data)
}

fn is_lower_cholesky(m: &DMatrix<f64>) -> bool {
    let n = m.nrows();
    (0..n).all(|i| {
        m[(i, i)] > 0.0 && m[(i, i)].is_finite() && (i + 1..n).all(|j| m[(i, j)] == 0.0)
    }) && m.iter().all(|x| x.is_finite())
}

fn is_symmetric(m: &DMatrix<f64>) -> bool {
    let n = m.nrows();
    (0..n).all(|i| (0..i).all(|j| (m[(i, j)] - m[(j, i)]).abs() < CHECK_TOL))
}
