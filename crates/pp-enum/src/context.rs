//! Enumeration context: records sample sites while a model runs, then
//! eliminates the enumerated dimensions.
//!
//! A model is any `Fn(&mut EnumContext) -> Result<()>`. Each call to
//! [`EnumContext::sample`] declares a site. Discrete latent sites marked for
//! parallel enumeration do not produce a value; instead their support becomes
//! a named dimension of every factor that depends on them. Plates add one
//! named dimension each. [`EnumContext::finalize`] multiplies the factors and
//! sums the enumerated dimensions out, innermost plate context first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Axis, IxDyn};
use pp_core::tensor::{as_scalar, broadcast_to, from_vec, numel, scalar};
use pp_core::{Error, PrngKey, Result, Tensor};
use pp_prob::{biject_to, DistRef, Distribution, Unit};
use tracing::debug;

use crate::backend::{backend_by_name, BackendRef, ReduceOp};
use crate::config::{EnumConfig, EnumMode, InferConfig};
use crate::factor::Factor;

/// Builds a site's distribution from its parents' values.
pub type DistBuilder = Arc<dyn Fn(&Assignment) -> Result<DistRef> + Send + Sync>;

/// Per-site config hook, see [`crate::infer_config`].
pub type InferFn = Arc<dyn Fn(&str, &dyn Distribution) -> Option<InferConfig> + Send + Sync>;

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet tracing.
    Inactive,
    /// Model is running; sites may be declared.
    Tracing,
    /// Factors are being (or have been) eliminated.
    Finalizing,
}

/// A probabilistic program over an [`EnumContext`].
pub trait Model: Send + Sync {
    /// Declare the model's sites on `ctx`.
    fn run(&self, ctx: &mut EnumContext) -> Result<()>;
}

impl<F> Model for F
where
    F: Fn(&mut EnumContext) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &mut EnumContext) -> Result<()> {
        self(ctx)
    }
}

/// Parent values handed to a [`DistBuilder`].
///
/// Parallel-enumerated parents appear as 0-d tensors holding one support
/// value; every other parent carries its full value.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    values: HashMap<String, Tensor>,
}

impl Assignment {
    /// Value of parent `name`.
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.values
            .get(name)
            .ok_or_else(|| Error::InvalidState(format!("'{}' is not a declared parent", name)))
    }

    /// Single-element parent value.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        as_scalar(self.get(name)?)
    }

    /// Single-element parent value as a category index.
    pub fn index(&self, name: &str) -> Result<usize> {
        let v = self.scalar(name)?;
        if v < 0.0 || v.fract() != 0.0 {
            return Err(Error::ConstraintViolation(format!(
                "parent '{}' = {} is not a category index",
                name, v
            )));
        }
        Ok(v as usize)
    }

    fn insert(&mut self, name: &str, value: Tensor) {
        self.values.insert(name.to_string(), value);
    }
}

/// Declaration of one sample site.
#[derive(Clone)]
pub struct SiteSpec {
    builder: DistBuilder,
    parents: Vec<String>,
    obs: Option<Tensor>,
    infer: Option<InferConfig>,
}

impl SiteSpec {
    /// Site whose distribution depends on its parents.
    pub fn new<F>(builder: F) -> Self
    where
        F: Fn(&Assignment) -> Result<DistRef> + Send + Sync + 'static,
    {
        Self { builder: Arc::new(builder), parents: Vec::new(), obs: None, infer: None }
    }

    /// Site with a fixed distribution.
    pub fn from_dist(dist: DistRef) -> Self {
        Self::new(move |_| Ok(dist.clone()))
    }

    /// Parent site names, in the order the builder expects them.
    pub fn parents(mut self, names: &[&str]) -> Self {
        self.parents = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Observed value.
    pub fn obs(mut self, value: Tensor) -> Self {
        self.obs = Some(value);
        self
    }

    /// Explicit inference config; takes precedence over any hook or default.
    pub fn infer(mut self, cfg: InferConfig) -> Self {
        self.infer = Some(cfg);
        self
    }
}

impl fmt::Debug for SiteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteSpec")
            .field("parents", &self.parents)
            .field("obs", &self.obs.as_ref().map(|o| o.shape().to_vec()))
            .field("infer", &self.infer)
            .finish_non_exhaustive()
    }
}

/// What a recorded site is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    /// Conditioned on data.
    Observed,
    /// Latent drawn with the trace's key.
    Sampled,
    /// Latent whose value was supplied (directly or through an
    /// unconstrained value).
    Substituted,
    /// Discrete latent summed out.
    Enumerated(EnumMode),
    /// Derived value, no density.
    Deterministic,
}

/// A recorded site.
#[derive(Debug, Clone)]
pub struct Site {
    /// Site name.
    pub name: String,
    /// Distribution family name.
    pub distribution: &'static str,
    /// Site kind.
    pub kind: SiteKind,
    /// Concrete value; `None` for parallel-enumerated sites.
    pub value: Option<Tensor>,
    /// Enumerated support values.
    pub support: Option<Vec<f64>>,
    /// Enclosing plates, outermost first.
    pub plates: Vec<String>,
    /// Log-density factor.
    pub log_prob: Option<Factor>,
    chain: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct ChainFrame {
    id: usize,
    history: usize,
    step: usize,
}

/// Tracing state for one run of a model.
pub struct EnumContext {
    phase: Phase,
    config: EnumConfig,
    backend: BackendRef,
    key: PrngKey,
    params: HashMap<String, Tensor>,
    unconstrained: HashMap<String, Tensor>,
    log_det: f64,
    default_mode: Option<EnumMode>,
    infer_fn: Option<InferFn>,
    plates: Vec<(String, usize)>,
    plate_sizes: HashMap<String, usize>,
    chains: Vec<ChainFrame>,
    next_chain: usize,
    sites: Vec<Site>,
    index: HashMap<String, usize>,
    seq_choices: Vec<usize>,
    seq_sizes: Vec<usize>,
}

impl fmt::Debug for EnumContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumContext")
            .field("phase", &self.phase)
            .field("backend", &self.backend.name())
            .field("sites", &self.sites.len())
            .field("plates", &self.plates)
            .finish_non_exhaustive()
    }
}

fn row_major(sizes: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    for &k in sizes {
        out = out
            .into_iter()
            .flat_map(|prefix: Vec<usize>| {
                (0..k).map(move |i| {
                    let mut p = prefix.clone();
                    p.push(i);
                    p
                })
            })
            .collect();
    }
    out
}

fn support_values(name: &str, dist: &dyn Distribution) -> Result<Vec<f64>> {
    if !dist.event_shape().is_empty() {
        return Err(Error::NotImplemented(format!(
            "enumerating '{}' needs a scalar event, {} has event shape {:?}",
            name,
            dist.name(),
            dist.event_shape()
        )));
    }
    let support = dist.enumerate_support(false)?;
    support
        .axis_iter(Axis(0))
        .map(|v| {
            v.iter()
                .next()
                .copied()
                .ok_or_else(|| Error::ShapeMismatch(format!("empty support slice for '{}'", name)))
        })
        .collect()
}

/// Broadcast a site log-density onto the plate stack and append it.
fn conform(site: &str, lp: &Tensor, plate_shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
    let mismatch = || {
        Error::ShapeMismatch(format!(
            "log-density of '{}' has shape {:?}, which does not fit the plate stack {:?}",
            site,
            lp.shape(),
            plate_shape
        ))
    };
    if lp.ndim() > plate_shape.len() {
        return Err(mismatch());
    }
    let view = broadcast_to(lp, plate_shape).map_err(|_| mismatch())?;
    out.extend(view.iter().copied());
    Ok(())
}

impl EnumContext {
    /// Fresh context. Fails with `BackendUnavailable` if `config.backend`
    /// is not compiled in.
    pub fn new(config: EnumConfig, key: PrngKey) -> Result<Self> {
        let backend = backend_by_name(&config.backend)?;
        let default_mode = config.default_enumerate;
        Ok(Self {
            phase: Phase::Inactive,
            config,
            backend,
            key,
            params: HashMap::new(),
            unconstrained: HashMap::new(),
            log_det: 0.0,
            default_mode,
            infer_fn: None,
            plates: Vec::new(),
            plate_sizes: HashMap::new(),
            chains: Vec::new(),
            next_chain: 0,
            sites: Vec::new(),
            index: HashMap::new(),
            seq_choices: Vec::new(),
            seq_sizes: Vec::new(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Settings.
    pub fn config(&self) -> &EnumConfig {
        &self.config
    }

    /// Factor backend.
    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }

    fn require(&self, phase: Phase, op: &str) -> Result<()> {
        if self.phase != phase {
            return Err(Error::InvalidState(format!(
                "{} called in phase {:?} (needs {:?})",
                op, self.phase, phase
            )));
        }
        Ok(())
    }

    /// Fix latent values by name. Only before [`begin`](Self::begin).
    pub fn substitute(&mut self, params: HashMap<String, Tensor>) -> Result<()> {
        self.require(Phase::Inactive, "substitute")?;
        self.params = params;
        Ok(())
    }

    /// Unconstrained values for latent sites; each is mapped through
    /// `biject_to(support)` and its log-Jacobian accumulated.
    pub fn set_unconstrained(&mut self, values: HashMap<String, Tensor>) -> Result<()> {
        self.require(Phase::Inactive, "set_unconstrained")?;
        self.unconstrained = values;
        Ok(())
    }

    pub(crate) fn set_sequential_choices(&mut self, choices: Vec<usize>) {
        self.seq_choices = choices;
    }

    pub(crate) fn sequential_sizes(&self) -> &[usize] {
        &self.seq_sizes
    }

    /// Sum of `log|J|` over the unconstrained values consumed so far.
    pub fn log_abs_det_jacobian(&self) -> f64 {
        self.log_det
    }

    /// Start tracing.
    pub fn begin(&mut self) -> Result<()> {
        self.require(Phase::Inactive, "begin")?;
        self.phase = Phase::Tracing;
        debug!(backend = self.backend.name(), "enumeration: inactive -> tracing");
        Ok(())
    }

    /// Run `body` with `mode` as the default for discrete latent sites
    /// that carry no explicit config.
    pub fn with_default_enumerate<F>(&mut self, mode: EnumMode, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved = self.default_mode.replace(mode);
        let out = body(self);
        self.default_mode = saved;
        out
    }

    /// Run `body` with a per-site config hook installed.
    pub fn with_infer_config<F>(&mut self, hook: InferFn, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved = self.infer_fn.replace(hook);
        let out = body(self);
        self.infer_fn = saved;
        out
    }

    /// Recorded site `name`.
    pub fn site(&self, name: &str) -> Option<&Site> {
        self.index.get(name).map(|&i| &self.sites[i])
    }

    /// All recorded sites in declaration order.
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Concrete value of site `name`.
    pub fn value(&self, name: &str) -> Option<&Tensor> {
        self.site(name).and_then(|s| s.value.as_ref())
    }

    /// Consume the context, keeping its sites.
    pub fn into_sites(self) -> Vec<Site> {
        self.sites
    }

    fn check_fresh_name(&self, name: &str) -> Result<()> {
        if self.index.contains_key(name) {
            return Err(Error::InvalidState(format!("site '{}' is already declared", name)));
        }
        if self.plate_sizes.contains_key(name) {
            return Err(Error::InvalidState(format!("'{}' is already a plate name", name)));
        }
        Ok(())
    }

    fn plate_names(&self) -> Vec<String> {
        self.plates.iter().map(|(n, _)| n.clone()).collect()
    }

    fn current_chain(&self) -> Option<(usize, usize)> {
        self.chains.last().map(|c| (c.id, c.step))
    }

    fn resolve_parent(&self, child: &str, parent: &str, plates: &[String]) -> Result<&Site> {
        let site = self.site(parent).ok_or_else(|| {
            Error::ShapeMismatch(format!("'{}' depends on '{}', which is not declared yet", child, parent))
        })?;
        if let Some(p) = site.plates.iter().find(|p| !plates.contains(p)) {
            return Err(Error::ShapeMismatch(format!(
                "'{}' depends on '{}' from plate '{}', which does not enclose '{}'",
                child, parent, p, child
            )));
        }
        if matches!(site.kind, SiteKind::Enumerated(_)) {
            // Plates are reduced innermost first, so an enumerated parent must
            // sit in an outer prefix of the child's plate stack.
            if !plates.starts_with(&site.plates) {
                return Err(Error::ShapeMismatch(format!(
                    "'{}' in plates {:?} depends on enumerated '{}' in plates {:?}, which is not an enclosing prefix",
                    child, plates, parent, site.plates
                )));
            }
            if let (Some((pid, pstep)), Some(frame)) = (site.chain, self.chains.last()) {
                if pid == frame.id && frame.step.saturating_sub(pstep) > frame.history {
                    return Err(Error::ShapeMismatch(format!(
                        "'{}' at step {} references enumerated '{}' from step {}, beyond markov history {}",
                        child, frame.step, parent, pstep, frame.history
                    )));
                }
            }
        }
        Ok(site)
    }

    fn resolve_mode(&self, name: &str, spec: &SiteSpec, dist: &dyn Distribution) -> Result<Option<EnumMode>> {
        let explicit = match spec.infer {
            Some(cfg) => Some(cfg.enumerate),
            None => self.infer_fn.as_ref().and_then(|hook| hook(name, dist)).map(|c| c.enumerate),
        };
        let Some(mode) = explicit else {
            return Ok(self.default_mode.filter(|_| dist.is_discrete() && dist.has_enumerate_support()));
        };
        if mode.is_some() && !dist.has_enumerate_support() {
            return Err(Error::NotImplemented(format!(
                "'{}' ({}) has no finite support to enumerate",
                name,
                dist.name()
            )));
        }
        Ok(mode)
    }

    /// Declare a sample site.
    ///
    /// Returns the site's value, or `None` when it is enumerated in
    /// parallel (its values live in a factor dimension instead).
    pub fn sample(&mut self, name: &str, spec: SiteSpec) -> Result<Option<Tensor>> {
        self.require(Phase::Tracing, "sample")?;
        self.check_fresh_name(name)?;
        let plates = self.plate_names();
        let plate_shape: Vec<usize> = self.plates.iter().map(|(_, s)| *s).collect();

        let mut base = Assignment::default();
        let mut enum_parents: Vec<(String, Vec<f64>)> = Vec::new();
        for parent in &spec.parents {
            let site = self.resolve_parent(name, parent, &plates)?;
            match (site.kind, &site.support) {
                (SiteKind::Enumerated(EnumMode::Parallel), Some(values)) => {
                    enum_parents.push((parent.clone(), values.clone()));
                }
                _ => {
                    let v = site.value.clone().ok_or_else(|| {
                        Error::InvalidState(format!("parent '{}' of '{}' has no value", parent, name))
                    })?;
                    base.insert(parent, v);
                }
            }
        }

        let sizes: Vec<usize> = enum_parents.iter().map(|(_, v)| v.len()).collect();
        let combos = row_major(&sizes);
        let assign_at = |combo: &[usize]| {
            let mut a = base.clone();
            for ((parent, values), &i) in enum_parents.iter().zip(combo) {
                a.insert(parent, scalar(values[i]));
            }
            a
        };
        let first = (spec.builder)(&assign_at(&combos[0]))?;

        let (kind, value, support) = if let Some(obs) = &spec.obs {
            (SiteKind::Observed, Some(obs.clone()), None)
        } else if let Some(v) = self.params.get(name) {
            (SiteKind::Substituted, Some(v.clone()), None)
        } else if let Some(x) = self.unconstrained.get(name) {
            let t = biject_to(&first.support())?;
            let y = t.forward(x)?;
            self.log_det += t.log_abs_det_jacobian(x, &y)?.sum();
            (SiteKind::Substituted, Some(y), None)
        } else {
            match self.resolve_mode(name, &spec, first.as_ref())? {
                Some(EnumMode::Parallel) => {
                    let values = support_values(name, first.as_ref())?;
                    (SiteKind::Enumerated(EnumMode::Parallel), None, Some(values))
                }
                Some(EnumMode::Sequential) => {
                    if !plates.is_empty() {
                        return Err(Error::ShapeMismatch(format!(
                            "'{}' cannot be enumerated sequentially inside plates {:?}",
                            name, plates
                        )));
                    }
                    let values = support_values(name, first.as_ref())?;
                    let choice = self.seq_choices.get(self.seq_sizes.len()).copied().unwrap_or(0);
                    let v = *values.get(choice).ok_or_else(|| {
                        Error::InvalidState(format!(
                            "replay choice {} is outside the {}-value support of '{}'",
                            choice,
                            values.len(),
                            name
                        ))
                    })?;
                    self.seq_sizes.push(values.len());
                    (SiteKind::Enumerated(EnumMode::Sequential), Some(scalar(v)), Some(values))
                }
                None => {
                    if !enum_parents.is_empty() {
                        return Err(Error::InvalidState(format!(
                            "latent '{}' depends on enumerated sites and cannot be sampled; observe, substitute or enumerate it",
                            name
                        )));
                    }
                    let key = self.key.fold_in(self.sites.len() as u32);
                    (SiteKind::Sampled, Some(first.sample(key, &[])?), None)
                }
            }
        };

        let parallel = matches!(kind, SiteKind::Enumerated(EnumMode::Parallel));
        let mut dims: Vec<String> = enum_parents.iter().map(|(n, _)| n.clone()).collect();
        let mut shape = sizes;
        if parallel {
            dims.push(name.to_string());
            shape.push(support.as_ref().map_or(0, Vec::len));
        }
        dims.extend(plates.iter().cloned());
        shape.extend_from_slice(&plate_shape);

        let mut data = Vec::with_capacity(numel(&shape));
        for (i, combo) in combos.iter().enumerate() {
            let dist = if i == 0 { first.clone() } else { (spec.builder)(&assign_at(combo))? };
            match (&support, &value) {
                (Some(values), None) => {
                    for &v in values {
                        conform(name, &dist.log_prob(&scalar(v))?, &plate_shape, &mut data)?;
                    }
                }
                (_, Some(v)) => conform(name, &dist.log_prob(v)?, &plate_shape, &mut data)?,
                (None, None) => {
                    return Err(Error::InvalidState(format!("site '{}' has neither value nor support", name)));
                }
            }
        }
        let factor = self.backend.factor_from_log_prob(dims, from_vec(&shape, data)?)?;
        debug!(site = name, kind = ?kind, dims = ?factor.dims(), "recorded sample site");

        self.index.insert(name.to_string(), self.sites.len());
        self.sites.push(Site {
            name: name.to_string(),
            distribution: first.name(),
            kind,
            value: value.clone(),
            support,
            plates,
            log_prob: Some(factor),
            chain: self.current_chain(),
        });
        Ok(value)
    }

    /// Add `log_factor` to the joint density as an observed `Unit` site.
    pub fn factor(&mut self, name: &str, log_factor: Tensor) -> Result<()> {
        let mut shape = log_factor.shape().to_vec();
        shape.push(0);
        let unit: DistRef = Arc::new(Unit::new(log_factor));
        self.sample(name, SiteSpec::from_dist(unit).obs(Tensor::zeros(IxDyn(&shape))))?;
        Ok(())
    }

    /// Record a derived value. It may be used as a parent but adds no density.
    pub fn deterministic(&mut self, name: &str, value: Tensor) -> Result<Tensor> {
        self.require(Phase::Tracing, "deterministic")?;
        self.check_fresh_name(name)?;
        self.index.insert(name.to_string(), self.sites.len());
        self.sites.push(Site {
            name: name.to_string(),
            distribution: "Deterministic",
            kind: SiteKind::Deterministic,
            value: Some(value.clone()),
            support: None,
            plates: self.plate_names(),
            log_prob: None,
            chain: self.current_chain(),
        });
        Ok(value)
    }

    /// Run `body` inside a conditionally independent plate of `size` members.
    pub fn plate<F>(&mut self, name: &str, size: usize, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.require(Phase::Tracing, "plate")?;
        if self.index.contains_key(name) {
            return Err(Error::InvalidState(format!("'{}' is already a sample site", name)));
        }
        if self.plates.iter().any(|(n, _)| n == name) {
            return Err(Error::ShapeMismatch(format!("plate '{}' is already active", name)));
        }
        if size == 0 {
            return Err(Error::ShapeMismatch(format!("plate '{}' has no members", name)));
        }
        if let Some(&prev) = self.plate_sizes.get(name) {
            if prev != size {
                return Err(Error::ShapeMismatch(format!(
                    "plate '{}' was declared with size {}, now {}",
                    name, prev, size
                )));
            }
        }
        if self.plates.len() >= self.config.max_plate_nesting {
            return Err(Error::ShapeMismatch(format!(
                "plate '{}' exceeds max_plate_nesting = {}",
                name, self.config.max_plate_nesting
            )));
        }
        self.plate_sizes.insert(name.to_string(), size);
        self.plates.push((name.to_string(), size));
        let out = body(self);
        self.plates.pop();
        out
    }

    /// Run `body` once as a markov scope of the given `history`.
    pub fn markov<F>(&mut self, history: usize, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.require(Phase::Tracing, "markov")?;
        let id = self.next_chain;
        self.next_chain += 1;
        self.chains.push(ChainFrame { id, history, step: 0 });
        let out = body(self);
        self.chains.pop();
        out
    }

    /// Run `body` for steps `0..steps`. A site at step `t` may reference
    /// enumerated sites of this chain from steps `t - history ..= t` only.
    pub fn markov_chain<F>(&mut self, steps: usize, history: usize, mut body: F) -> Result<()>
    where
        F: FnMut(&mut Self, usize) -> Result<()>,
    {
        self.require(Phase::Tracing, "markov_chain")?;
        let id = self.next_chain;
        self.next_chain += 1;
        self.chains.push(ChainFrame { id, history, step: 0 });
        let mut out = Ok(());
        for t in 0..steps {
            if let Some(frame) = self.chains.last_mut() {
                frame.step = t;
            }
            if let Err(e) = body(self, t) {
                out = Err(e);
                break;
            }
        }
        self.chains.pop();
        out
    }

    fn eliminate_context(
        &self,
        pending: &mut Vec<(Vec<String>, Factor)>,
        context: &[String],
        enum_vars: &[(String, Vec<String>)],
    ) -> Result<()> {
        for (var, _) in enum_vars.iter().filter(|(_, p)| p.as_slice() == context) {
            let (involved, rest): (Vec<_>, Vec<_>) =
                std::mem::take(pending).into_iter().partition(|(_, f)| f.has_dim(var));
            *pending = rest;
            if involved.is_empty() {
                continue;
            }
            let factors: Vec<Factor> = involved.into_iter().map(|(_, f)| f).collect();
            let joint = self.backend.product(&factors)?;
            let marginal = self.backend.eliminate(&joint, var, ReduceOp::LogSumExp)?;
            debug!(var = %var, remaining = ?marginal.dims(), "eliminated enumerated site");
            pending.push((context.to_vec(), marginal));
        }
        Ok(())
    }

    /// Combine every site factor and eliminate all enumerated dimensions.
    ///
    /// Plate contexts are processed from the most deeply nested outwards.
    /// Within a context, enumerated variables declared there are summed out
    /// in declaration order; then the innermost plate is reduced by a
    /// product over its members and the factors move to the enclosing
    /// context.
    pub fn finalize(&mut self) -> Result<f64> {
        self.require(Phase::Tracing, "finalize")?;
        if !self.plates.is_empty() {
            return Err(Error::InvalidState(format!(
                "finalize called inside plates {:?}",
                self.plate_names()
            )));
        }
        self.phase = Phase::Finalizing;
        debug!(sites = self.sites.len(), "enumeration: tracing -> finalizing");

        let mut pending: Vec<(Vec<String>, Factor)> = self
            .sites
            .iter()
            .filter_map(|s| s.log_prob.clone().map(|f| (s.plates.clone(), f)))
            .collect();
        let enum_vars: Vec<(String, Vec<String>)> = self
            .sites
            .iter()
            .filter(|s| s.kind == SiteKind::Enumerated(EnumMode::Parallel))
            .map(|s| (s.name.clone(), s.plates.clone()))
            .collect();

        loop {
            let deepest = match pending.iter().map(|(p, _)| p).max_by_key(|p| p.len()) {
                Some(p) if !p.is_empty() => p.clone(),
                _ => break,
            };
            self.eliminate_context(&mut pending, &deepest, &enum_vars)?;
            let mut outer = deepest.clone();
            let Some(inner) = outer.pop() else { break };
            for (plates, factor) in pending.iter_mut() {
                if *plates == deepest {
                    *factor = self.backend.eliminate(factor, &inner, ReduceOp::Sum)?;
                    *plates = outer.clone();
                }
            }
            debug!(plate = %inner, "reduced plate");
        }
        self.eliminate_context(&mut pending, &[], &enum_vars)?;

        let factors: Vec<Factor> = pending.into_iter().map(|(_, f)| f).collect();
        let lp = self.backend.product(&factors)?.value()?;
        debug!(log_density = lp, "enumeration finalized");
        Ok(lp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pp_core::tensor::vector;
    use pp_prob::{Bernoulli, Categorical, Normal};

    fn ctx() -> EnumContext {
        let mut c = EnumContext::new(EnumConfig::default(), PrngKey::new(0)).unwrap();
        c.begin().unwrap();
        c
    }

    fn coin(p: f64) -> SiteSpec {
        SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(p)).unwrap()))
            .infer(InferConfig::enumerate(EnumMode::Parallel))
    }

    #[test]
    fn test_phase_misuse() {
        let mut c = EnumContext::new(EnumConfig::default(), PrngKey::new(0)).unwrap();
        let spec = SiteSpec::from_dist(Arc::new(Normal::new(scalar(0.0), scalar(1.0)).unwrap()));
        assert!(matches!(c.sample("x", spec.clone()), Err(Error::InvalidState(_))));
        assert!(matches!(c.finalize(), Err(Error::InvalidState(_))));
        c.begin().unwrap();
        assert!(matches!(c.begin(), Err(Error::InvalidState(_))));
        c.sample("x", spec.clone()).unwrap();
        c.finalize().unwrap();
        assert_eq!(c.phase(), Phase::Finalizing);
        assert!(matches!(c.sample("y", spec), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_single_enumerated_site_marginalizes_to_zero() {
        let mut c = ctx();
        assert!(c.sample("z", coin(0.3)).unwrap().is_none());
        assert_relative_eq!(c.finalize().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_observed_child_of_enumerated_parent() {
        let mut c = ctx();
        c.sample("z", coin(0.3)).unwrap();
        let mus = [-1.0, 2.0];
        let spec = SiteSpec::new(move |a: &Assignment| {
            let d: DistRef = Arc::new(Normal::new(scalar(mus[a.index("z")?]), scalar(1.0))?);
            Ok(d)
        })
        .parents(&["z"])
        .obs(scalar(0.5));
        c.sample("y", spec).unwrap();
        assert_eq!(c.site("y").unwrap().log_prob.as_ref().unwrap().dims(), &["z".to_string()]);
        let lp = c.finalize().unwrap();
        let p = |mu: f64| pp_prob::normal::logpdf(0.5, mu, 1.0).unwrap().exp();
        assert_relative_eq!(lp, (0.7 * p(-1.0) + 0.3 * p(2.0)).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let mut c = ctx();
        c.sample("z", coin(0.5)).unwrap();
        assert!(matches!(c.sample("z", coin(0.5)), Err(Error::InvalidState(_))));
        let orphan = coin(0.5).parents(&["missing"]);
        assert!(matches!(c.sample("w", orphan), Err(Error::ShapeMismatch(_))));
        assert!(matches!(c.plate("z", 2, |_| Ok(())), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_plate_rules() {
        let mut c = EnumContext::new(EnumConfig { max_plate_nesting: 1, ..EnumConfig::default() }, PrngKey::new(0))
            .unwrap();
        c.begin().unwrap();
        let nested = c.plate("a", 2, |c| c.plate("b", 3, |_| Ok(())));
        assert!(matches!(nested, Err(Error::ShapeMismatch(_))));
        assert!(matches!(c.plate("a", 5, |_| Ok(())), Err(Error::ShapeMismatch(_))));
        assert!(matches!(c.plate("empty", 0, |_| Ok(())), Err(Error::ShapeMismatch(_))));

        c.plate("a", 2, |c| c.sample("za", coin(0.5)).map(|_| ())).unwrap();
        let outside = coin(0.5).parents(&["za"]);
        assert!(matches!(c.sample("w", outside), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_observation_must_fit_plate() {
        let mut c = ctx();
        let res = c.plate("data", 3, |c| {
            let spec = SiteSpec::from_dist(Arc::new(Normal::new(scalar(0.0), scalar(1.0)).unwrap()))
                .obs(vector(&[0.1, 0.2]));
            c.sample("y", spec).map(|_| ())
        });
        assert!(matches!(res, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_sequential_inside_plate_is_rejected() {
        let mut c = ctx();
        let seq = SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(0.5)).unwrap()))
            .infer(InferConfig::enumerate(EnumMode::Sequential));
        let res = c.plate("data", 2, |c| c.sample("z", seq).map(|_| ()));
        assert!(matches!(res, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_sampled_child_of_enumerated_parent_is_rejected() {
        let mut c = ctx();
        c.sample("z", coin(0.5)).unwrap();
        let child = SiteSpec::new(|a: &Assignment| {
            let d: DistRef = Arc::new(Normal::new(a.get("z")?.clone(), scalar(1.0))?);
            Ok(d)
        })
        .parents(&["z"]);
        assert!(matches!(c.sample("x", child), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_markov_history_is_enforced() {
        let mut c = ctx();
        let res = c.markov_chain(3, 1, |c, t| {
            let mut spec = SiteSpec::from_dist(Arc::new(Categorical::from_probs(vector(&[0.5, 0.5])).unwrap()))
                .infer(InferConfig::enumerate(EnumMode::Parallel));
            if t == 2 {
                spec = spec.parents(&["x0"]);
            }
            c.sample(&format!("x{}", t), spec).map(|_| ())
        });
        assert!(matches!(res, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_factor_and_deterministic() {
        let mut c = ctx();
        c.plate("data", 2, |c| c.factor("penalty", vector(&[-0.5, -1.5]))).unwrap();
        let v = c.deterministic("twice", scalar(2.0)).unwrap();
        assert_eq!(c.value("twice"), Some(&v));
        assert_eq!(c.site("penalty").unwrap().distribution, "Unit");
        assert_relative_eq!(c.finalize().unwrap(), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_default_mode_only_touches_discrete_sites() {
        let mut c = ctx();
        c.with_default_enumerate(EnumMode::Parallel, |c| {
            c.sample("z", SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(0.4)).unwrap())))?;
            c.sample("x", SiteSpec::from_dist(Arc::new(Normal::new(scalar(0.0), scalar(1.0)).unwrap())))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(c.site("z").unwrap().kind, SiteKind::Enumerated(EnumMode::Parallel));
        assert_eq!(c.site("x").unwrap().kind, SiteKind::Sampled);
    }

    #[test]
    fn test_row_major_combos() {
        assert_eq!(row_major(&[]), vec![Vec::<usize>::new()]);
        assert_eq!(row_major(&[2, 2]), vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }
}
