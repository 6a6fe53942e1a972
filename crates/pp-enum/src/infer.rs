//! Entry points: tracing, marginal log-density, potential energy and
//! model wrappers.

use std::collections::HashMap;
use std::sync::Arc;

use pp_core::tensor::logsumexp;
use pp_core::{Error, PrngKey, Result, Tensor};
use pp_prob::Distribution;

use crate::config::{EnumConfig, EnumMode, InferConfig};
use crate::context::{EnumContext, InferFn, Model, Site, SiteKind};

/// Sites recorded by one run, plus the marginal log-density.
#[derive(Debug, Clone)]
pub struct Trace {
    /// Sites in declaration order. Sequentially enumerated sites show the
    /// first support value.
    pub sites: Vec<Site>,
    /// Log-density with every enumerated site summed out.
    pub log_density: f64,
    /// Accumulated `log|J|` of unconstrained-to-constrained maps.
    pub log_abs_det_jacobian: f64,
}

impl Trace {
    /// Site by name.
    pub fn site(&self, name: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Concrete values of every site that has one.
    pub fn values(&self) -> HashMap<String, Tensor> {
        self.sites.iter().filter_map(|s| s.value.clone().map(|v| (s.name.clone(), v))).collect()
    }
}

struct Setup<'a> {
    config: &'a EnumConfig,
    key: PrngKey,
    params: &'a HashMap<String, Tensor>,
    unconstrained: Option<&'a HashMap<String, Tensor>>,
}

fn replay<M: Model + ?Sized>(model: &M, setup: &Setup<'_>, choices: Vec<usize>) -> Result<(f64, EnumContext)> {
    let mut ctx = EnumContext::new(setup.config.clone(), setup.key)?;
    ctx.substitute(setup.params.clone())?;
    if let Some(u) = setup.unconstrained {
        ctx.set_unconstrained(u.clone())?;
    }
    ctx.set_sequential_choices(choices);
    ctx.begin()?;
    model.run(&mut ctx)?;
    let lp = ctx.finalize()?;
    Ok((lp, ctx))
}

/// Depth-first over sequential sites: replay with `prefix` fixed, branch on
/// the first unfixed sequential site, log-sum-exp the branches.
fn marginalize<M: Model + ?Sized>(model: &M, setup: &Setup<'_>, prefix: Vec<usize>) -> Result<(f64, EnumContext)> {
    let (lp, ctx) = replay(model, setup, prefix.clone())?;
    let next = ctx.sequential_sizes().get(prefix.len()).copied();
    let Some(k) = next else {
        return Ok((lp, ctx));
    };
    tracing::debug!(depth = prefix.len(), branches = k, "sequential enumeration branch");
    let mut terms = Vec::with_capacity(k);
    for i in 0..k {
        let mut branch = prefix.clone();
        branch.push(i);
        terms.push(marginalize(model, setup, branch)?.0);
    }
    Ok((logsumexp(&terms), ctx))
}

fn run<M: Model + ?Sized>(model: &M, setup: &Setup<'_>) -> Result<Trace> {
    let (log_density, ctx) = marginalize(model, setup, Vec::new())?;
    let log_abs_det_jacobian = ctx.log_abs_det_jacobian();
    Ok(Trace { sites: ctx.into_sites(), log_density, log_abs_det_jacobian })
}

/// Run `model` once and record its sites.
///
/// `params` fixes latent sites by name; remaining latent sites are sampled
/// from `key` (site `i` uses `key.fold_in(i)`), enumerated sites are summed
/// out.
pub fn trace<M: Model + ?Sized>(
    model: &M,
    params: &HashMap<String, Tensor>,
    config: &EnumConfig,
    key: PrngKey,
) -> Result<Trace> {
    run(model, &Setup { config, key, params, unconstrained: None })
}

/// Joint log-density of `model` with enumerated sites marginalized.
pub fn log_density<M: Model + ?Sized>(
    model: &M,
    params: &HashMap<String, Tensor>,
    config: &EnumConfig,
    key: PrngKey,
) -> Result<f64> {
    Ok(trace(model, params, config, key)?.log_density)
}

fn unconstrained_run<M: Model + ?Sized>(
    model: &M,
    unconstrained: &HashMap<String, Tensor>,
    config: &EnumConfig,
) -> Result<Trace> {
    let empty = HashMap::new();
    let t = run(model, &Setup { config, key: PrngKey::new(0), params: &empty, unconstrained: Some(unconstrained) })?;
    if let Some(site) = t.sites.iter().find(|s| s.kind == SiteKind::Sampled) {
        return Err(Error::InvalidState(format!(
            "latent '{}' has no unconstrained value",
            site.name
        )));
    }
    Ok(t)
}

/// `-(log_density + Σ log|J|)` at unconstrained latent values.
///
/// Every non-enumerated latent site must have an entry in `unconstrained`;
/// it is mapped through `biject_to(support)` before scoring.
pub fn potential_energy<M: Model + ?Sized>(
    model: &M,
    unconstrained: &HashMap<String, Tensor>,
    config: &EnumConfig,
) -> Result<f64> {
    let t = unconstrained_run(model, unconstrained, config)?;
    Ok(-(t.log_density + t.log_abs_det_jacobian))
}

/// Constrained latent values (and deterministic sites) for unconstrained
/// inputs.
pub fn constrain_params<M: Model + ?Sized>(
    model: &M,
    unconstrained: &HashMap<String, Tensor>,
    config: &EnumConfig,
) -> Result<HashMap<String, Tensor>> {
    let t = unconstrained_run(model, unconstrained, config)?;
    Ok(t
        .sites
        .into_iter()
        .filter(|s| matches!(s.kind, SiteKind::Substituted | SiteKind::Deterministic))
        .filter_map(|s| s.value.map(|v| (s.name, v)))
        .collect())
}

/// `n` independent traces in parallel, one child key each.
pub fn trace_many<M: Model + ?Sized>(
    model: &M,
    params: &HashMap<String, Tensor>,
    config: &EnumConfig,
    key: PrngKey,
    n: usize,
) -> Result<Vec<Trace>> {
    use rayon::prelude::*;

    let traces: Vec<Result<Trace>> =
        key.split(n).into_par_iter().map(|k| trace(model, params, config, k)).collect();
    traces.into_iter().collect()
}

/// Wrap `model` so every discrete latent site without an explicit config
/// is enumerated with `mode`.
pub fn config_enumerate<M: Model>(model: M, mode: EnumMode) -> impl Fn(&mut EnumContext) -> Result<()> + Send + Sync {
    move |ctx: &mut EnumContext| ctx.with_default_enumerate(mode, |c| model.run(c))
}

/// Wrap `model` with a per-site config hook. The hook sees the site name and
/// its distribution; returning `Some` overrides the default mode.
pub fn infer_config<M, F>(model: M, hook: F) -> impl Fn(&mut EnumContext) -> Result<()> + Send + Sync
where
    M: Model,
    F: Fn(&str, &dyn Distribution) -> Option<InferConfig> + Send + Sync + 'static,
{
    let hook: InferFn = Arc::new(hook);
    move |ctx: &mut EnumContext| ctx.with_infer_config(hook.clone(), |c| model.run(c))
}
