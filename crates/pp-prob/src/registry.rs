//! Constraint -> default transform registry.
//!
//! [`biject_to`] answers "which bijection takes `R^n` onto this domain".
//! The process-wide registry is created with the built-in defaults on first
//! access and only grows afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use pp_core::{Error, Result};

use crate::constraints::{Constraint, ConstraintKind};
use crate::transforms::{
    AffineTransform, CholeskyProductTransform, ComposeTransform, CorrCholeskyTransform,
    ExpTransform, IdentityTransform, IndependentTransform, LowerCholeskyTransform,
    OrderedTransform, SigmoidTransform, StickBreakingTransform, TransformRef,
};

type BuildFn = dyn Fn(&Constraint) -> Result<TransformRef> + Send + Sync;

/// Named builder producing the transform for a concrete constraint value.
///
/// The name identifies the factory: registering a factory under a kind that
/// already holds a factory with the same name is accepted as a no-op.
#[derive(Clone)]
pub struct TransformFactory {
    name: Arc<str>,
    build: Arc<BuildFn>,
}

impl TransformFactory {
    /// Wrap a builder closure.
    pub fn new<F>(name: &str, build: F) -> Self
    where
        F: Fn(&Constraint) -> Result<TransformRef> + Send + Sync + 'static,
    {
        Self { name: Arc::from(name), build: Arc::new(build) }
    }

    /// Factory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the transform for `constraint`.
    pub fn build(&self, constraint: &Constraint) -> Result<TransformRef> {
        (self.build)(constraint)
    }
}

impl fmt::Debug for TransformFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformFactory").field("name", &self.name).finish()
    }
}

/// Append-only map from constraint kind to transform factory.
pub struct TransformRegistry {
    factories: RwLock<HashMap<ConstraintKind, TransformFactory>>,
}

impl TransformRegistry {
    /// Registry with no entries.
    pub fn empty() -> Self {
        Self { factories: RwLock::new(HashMap::new()) }
    }

    /// Registry holding the built-in defaults.
    pub fn with_defaults() -> Self {
        let mut map = HashMap::new();
        for (kind, factory) in default_factories() {
            map.insert(kind, factory);
        }
        Self { factories: RwLock::new(map) }
    }

    /// Register `factory` for `kind`.
    ///
    /// Re-registering a factory with the same name is a no-op; a different
    /// factory for an already-registered kind is a [`Error::RegistryConflict`].
    pub fn register(&self, kind: ConstraintKind, factory: TransformFactory) -> Result<()> {
        let mut map = self
            .factories
            .write()
            .map_err(|_| Error::InvalidState("transform registry lock poisoned".into()))?;
        if let Some(existing) = map.get(&kind) {
            if existing.name() == factory.name() {
                tracing::debug!(kind = %kind, factory = factory.name(), "transform already registered");
                return Ok(());
            }
            return Err(Error::RegistryConflict(format!(
                "constraint `{}` already maps to `{}`, refusing `{}`",
                kind,
                existing.name(),
                factory.name()
            )));
        }
        tracing::info!(kind = %kind, factory = factory.name(), "registered transform");
        map.insert(kind, factory);
        Ok(())
    }

    /// Transform for `constraint`, or [`Error::MissingTransform`].
    pub fn get(&self, constraint: &Constraint) -> Result<TransformRef> {
        let factory = {
            let map = self
                .factories
                .read()
                .map_err(|_| Error::InvalidState("transform registry lock poisoned".into()))?;
            map.get(&constraint.kind()).cloned()
        };
        match factory {
            Some(f) => f.build(constraint),
            None => Err(Error::MissingTransform(constraint.to_string())),
        }
    }

    /// Whether `kind` has a factory.
    pub fn contains(&self, kind: &ConstraintKind) -> bool {
        self.factories.read().map(|m| m.contains_key(kind)).unwrap_or(false)
    }

    /// Registered kinds, sorted by name.
    pub fn kinds(&self) -> Vec<ConstraintKind> {
        let mut kinds: Vec<ConstraintKind> =
            self.factories.read().map(|m| m.keys().cloned().collect()).unwrap_or_default();
        kinds.sort_by(|a, b| a.name().cmp(b.name()));
        kinds
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry").field("kinds", &self.kinds()).finish()
    }
}

fn fixed<T>(name: &str, make: fn() -> T) -> TransformFactory
where
    T: crate::transforms::Transform + 'static,
{
    TransformFactory::new(name, move |_| Ok(Arc::new(make()) as TransformRef))
}

fn compose(parts: Vec<TransformRef>) -> Result<TransformRef> {
    Ok(Arc::new(ComposeTransform::new(parts)?))
}

fn default_factories() -> Vec<(ConstraintKind, TransformFactory)> {
    vec![
        (ConstraintKind::Real, fixed("identity", IdentityTransform::default)),
        (
            ConstraintKind::RealVector,
            TransformFactory::new("independent_identity", |_| {
                Ok(Arc::new(IndependentTransform::new(Arc::new(IdentityTransform::default()), 1)))
            }),
        ),
        (ConstraintKind::Positive, fixed("exp", ExpTransform::default)),
        (
            ConstraintKind::GreaterThan,
            TransformFactory::new("exp_affine_lower", |c| match c {
                Constraint::GreaterThan(lb) => compose(vec![
                    Arc::new(ExpTransform::default()),
                    Arc::new(AffineTransform::new(lb.clone(), pp_core::tensor::scalar(1.0), Constraint::Positive)?),
                ]),
                other => Err(Error::MissingTransform(other.to_string())),
            }),
        ),
        (
            ConstraintKind::LessThan,
            TransformFactory::new("exp_affine_upper", |c| match c {
                Constraint::LessThan(ub) => compose(vec![
                    Arc::new(ExpTransform::default()),
                    Arc::new(AffineTransform::new(ub.clone(), pp_core::tensor::scalar(-1.0), Constraint::Positive)?),
                ]),
                other => Err(Error::MissingTransform(other.to_string())),
            }),
        ),
        (
            ConstraintKind::Interval,
            TransformFactory::new("sigmoid_affine", |c| match c {
                Constraint::Interval(lb, ub) => {
                    let width = pp_core::tensor::try_map2(lb, ub, |l, u| Ok(u - l))?;
                    compose(vec![
                        Arc::new(SigmoidTransform::default()),
                        Arc::new(AffineTransform::new(lb.clone(), width, Constraint::UnitInterval)?),
                    ])
                }
                other => Err(Error::MissingTransform(other.to_string())),
            }),
        ),
        (ConstraintKind::UnitInterval, fixed("sigmoid", SigmoidTransform::default)),
        (ConstraintKind::Simplex, fixed("stick_breaking", StickBreakingTransform::default)),
        (ConstraintKind::OrderedVector, fixed("ordered", OrderedTransform::default)),
        (ConstraintKind::LowerCholesky, fixed("lower_cholesky", LowerCholeskyTransform::default)),
        (ConstraintKind::CorrCholesky, fixed("corr_cholesky", CorrCholeskyTransform::default)),
        (
            ConstraintKind::CorrMatrix,
            TransformFactory::new("corr_cholesky_product", |_| {
                compose(vec![
                    Arc::new(CorrCholeskyTransform),
                    Arc::new(CholeskyProductTransform::correlation()),
                ])
            }),
        ),
        (
            ConstraintKind::PositiveDefinite,
            TransformFactory::new("lower_cholesky_product", |_| {
                compose(vec![
                    Arc::new(LowerCholeskyTransform),
                    Arc::new(CholeskyProductTransform::covariance()),
                ])
            }),
        ),
    ]
}

static GLOBAL_REGISTRY: OnceLock<TransformRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static TransformRegistry {
    GLOBAL_REGISTRY.get_or_init(TransformRegistry::with_defaults)
}

/// Default transform from unconstrained space onto `constraint`.
pub fn biject_to(constraint: &Constraint) -> Result<TransformRef> {
    registry().get(constraint)
}

/// Register a factory in the process-wide registry.
pub fn register(kind: ConstraintKind, factory: TransformFactory) -> Result<()> {
    registry().register(kind, factory)
}
