//! Marginal log-densities against brute-force sums over every latent
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use pp_core::tensor::{as_scalar, scalar, vector};
use pp_core::{Error, PrngKey, Result, Tensor};
use pp_enum::*;
use pp_prob::{Bernoulli, Categorical, DistRef, HalfNormal, Normal};

const INIT: [f64; 2] = [0.6, 0.4];
const TRANS: [[f64; 2]; 2] = [[0.7, 0.3], [0.2, 0.8]];
const EMIT_MU: [f64; 2] = [-1.0, 1.5];
const EMIT_SIGMA: f64 = 0.9;

fn npdf(y: f64, mu: f64, sigma: f64) -> f64 {
    pp_prob::normal::logpdf(y, mu, sigma).unwrap().exp()
}

fn hmm(ys: Vec<f64>) -> impl Fn(&mut EnumContext) -> Result<()> + Send + Sync {
    move |ctx: &mut EnumContext| -> Result<()> {
        ctx.markov_chain(ys.len(), 1, |ctx, t| {
            let x = format!("x{}", t);
            let spec = if t == 0 {
                SiteSpec::from_dist(Arc::new(Categorical::from_probs(vector(&INIT))?))
            } else {
                let prev = format!("x{}", t - 1);
                let key = prev.clone();
                SiteSpec::new(move |a: &Assignment| {
                    let d: DistRef = Arc::new(Categorical::from_probs(vector(&TRANS[a.index(&key)?]))?);
                    Ok(d)
                })
                .parents(&[prev.as_str()])
            };
            ctx.sample(&x, spec)?;

            let key = x.clone();
            let emit = SiteSpec::new(move |a: &Assignment| {
                let d: DistRef = Arc::new(Normal::new(scalar(EMIT_MU[a.index(&key)?]), scalar(EMIT_SIGMA))?);
                Ok(d)
            })
            .parents(&[x.as_str()])
            .obs(scalar(ys[t]));
            ctx.sample(&format!("y{}", t), emit)?;
            Ok(())
        })
    }
}

fn hmm_brute_force(ys: &[f64]) -> f64 {
    let mut total = 0.0;
    for path in 0..(1usize << ys.len()) {
        let xs: Vec<usize> = (0..ys.len()).map(|t| (path >> t) & 1).collect();
        let mut p = INIT[xs[0]];
        for t in 0..ys.len() {
            if t > 0 {
                p *= TRANS[xs[t - 1]][xs[t]];
            }
            p *= npdf(ys[t], EMIT_MU[xs[t]], EMIT_SIGMA);
        }
        total += p;
    }
    total.ln()
}

#[test]
fn hmm_parallel_matches_brute_force() {
    let ys = vec![0.3, -0.8, 1.9];
    let model = config_enumerate(hmm(ys.clone()), EnumMode::Parallel);
    let lp = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap();
    assert_relative_eq!(lp, hmm_brute_force(&ys), epsilon = 1e-6);
}

#[test]
fn hmm_sequential_matches_brute_force() {
    let ys = vec![0.3, -0.8, 1.9];
    let model = config_enumerate(hmm(ys.clone()), EnumMode::Sequential);
    let t = trace(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap();
    assert_relative_eq!(t.log_density, hmm_brute_force(&ys), epsilon = 1e-6);
    assert_eq!(t.site("x1").unwrap().kind, SiteKind::Enumerated(EnumMode::Sequential));
}

#[test]
fn default_enumerate_from_config_equals_wrapper() {
    let ys = vec![1.0, 0.0, -1.0, 2.0];
    let cfg = EnumConfig { default_enumerate: Some(EnumMode::Parallel), ..EnumConfig::default() };
    let lp = log_density(&hmm(ys.clone()), &HashMap::new(), &cfg, PrngKey::new(0)).unwrap();
    assert_relative_eq!(lp, hmm_brute_force(&ys), epsilon = 1e-6);
}

const MIX_C: f64 = 0.35;
const MIX_W: [f64; 2] = [0.4, 0.6];
const MIX_MU: [[f64; 2]; 2] = [[-2.0, 0.5], [1.0, 3.0]];

fn mixture(ys: Vec<f64>) -> impl Fn(&mut EnumContext) -> Result<()> + Send + Sync {
    move |ctx: &mut EnumContext| -> Result<()> {
        ctx.sample("c", SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(MIX_C))?)))?;
        let obs = vector(&ys);
        ctx.plate("data", ys.len(), |ctx| {
            ctx.sample("z", SiteSpec::from_dist(Arc::new(Categorical::from_probs(vector(&MIX_W))?)))?;
            let spec = SiteSpec::new(|a: &Assignment| {
                let mu = MIX_MU[a.index("c")?][a.index("z")?];
                let d: DistRef = Arc::new(Normal::new(scalar(mu), scalar(1.0))?);
                Ok(d)
            })
            .parents(&["c", "z"])
            .obs(obs);
            ctx.sample("y", spec)?;
            Ok(())
        })
    }
}

fn mixture_brute_force(ys: &[f64]) -> f64 {
    let mut total = 0.0;
    for (c, pc) in [(0usize, 1.0 - MIX_C), (1, MIX_C)] {
        let mut p = pc;
        for &y in ys {
            p *= (0..2).map(|k| MIX_W[k] * npdf(y, MIX_MU[c][k], 1.0)).sum::<f64>();
        }
        total += p;
    }
    total.ln()
}

#[test]
fn plated_mixture_matches_brute_force() {
    let ys = vec![-1.5, 0.2, 2.7, 0.9];
    let model = config_enumerate(mixture(ys.clone()), EnumMode::Parallel);
    let t = trace(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(3)).unwrap();
    assert_relative_eq!(t.log_density, mixture_brute_force(&ys), epsilon = 1e-9);

    let y = t.site("y").unwrap();
    assert_eq!(y.plates, vec!["data".to_string()]);
    let dims: Vec<&str> = y.log_prob.as_ref().unwrap().dims().iter().map(String::as_str).collect();
    assert_eq!(dims, vec!["c", "z", "data"]);
}

#[test]
fn sequential_global_with_parallel_local() {
    let ys = vec![0.4, -2.2, 3.1];
    let model = infer_config(mixture(ys.clone()), |name: &str, _d: &dyn pp_prob::Distribution| {
        let mode = if name == "c" { EnumMode::Sequential } else { EnumMode::Parallel };
        Some(InferConfig::enumerate(mode))
    });
    let lp = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap();
    assert_relative_eq!(lp, mixture_brute_force(&ys), epsilon = 1e-9);
}

#[test]
fn markov_history_violation_is_a_shape_error() {
    let model = |ctx: &mut EnumContext| -> Result<()> {
        ctx.markov_chain(3, 1, |ctx, t| {
            let mut spec = SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(0.5))?));
            if t == 2 {
                spec = spec.parents(&["x0"]);
            }
            ctx.sample(&format!("x{}", t), spec)?;
            Ok(())
        })
    };
    let model = config_enumerate(model, EnumMode::Parallel);
    let err = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)), "{err}");
}

#[test]
fn unknown_backend_is_reported() {
    let cfg = EnumConfig { backend: "funsor".into(), ..EnumConfig::default() };
    let err = log_density(&hmm(vec![0.0]), &HashMap::new(), &cfg, PrngKey::new(0)).unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable(_)));
}

fn scale_model(ctx: &mut EnumContext) -> Result<()> {
    ctx.sample("sigma", SiteSpec::from_dist(Arc::new(HalfNormal::new(scalar(1.0))?)))?;
    let spec = SiteSpec::new(|a: &Assignment| {
        let d: DistRef = Arc::new(Normal::new(scalar(0.0), a.get("sigma")?.clone())?);
        Ok(d)
    })
    .parents(&["sigma"])
    .obs(scalar(0.7));
    ctx.sample("y", spec)?;
    let twice = ctx.value("sigma").map(|s| s * 2.0).unwrap_or_else(|| scalar(0.0));
    ctx.deterministic("twice_sigma", twice)?;
    Ok(())
}

#[test]
fn potential_energy_uses_unconstrained_values() {
    let u = 0.2f64;
    let params = HashMap::from([("sigma".to_string(), scalar(u))]);
    let pe = potential_energy(&scale_model, &params, &EnumConfig::default()).unwrap();

    let sigma = u.exp();
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let half_normal = 2f64.ln() - 0.5 * ln_2pi - 0.5 * sigma * sigma;
    let lik = -0.5 * ln_2pi - sigma.ln() - 0.5 * (0.7 / sigma).powi(2);
    assert_relative_eq!(pe, -(half_normal + lik + u), epsilon = 1e-10);

    let constrained = constrain_params(&scale_model, &params, &EnumConfig::default()).unwrap();
    assert_relative_eq!(as_scalar(&constrained["sigma"]).unwrap(), sigma, epsilon = 1e-12);
    assert_relative_eq!(as_scalar(&constrained["twice_sigma"]).unwrap(), 2.0 * sigma, epsilon = 1e-12);
}

#[test]
fn potential_energy_requires_every_latent() {
    let err = potential_energy(&scale_model, &HashMap::new(), &EnumConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn substituted_params_are_scored_not_sampled() {
    let params = HashMap::from([("sigma".to_string(), scalar(1.3))]);
    let t = trace(&scale_model, &params, &EnumConfig::default(), PrngKey::new(9)).unwrap();
    assert_eq!(t.site("sigma").unwrap().kind, SiteKind::Substituted);
    assert_eq!(t.values()["sigma"], scalar(1.3));
}

#[test]
fn trace_many_is_deterministic_per_key() {
    let cfg = EnumConfig::default();
    let a = trace_many(&scale_model, &HashMap::new(), &cfg, PrngKey::new(42), 6).unwrap();
    let b = trace_many(&scale_model, &HashMap::new(), &cfg, PrngKey::new(42), 6).unwrap();
    assert_eq!(a.len(), 6);
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.values()["sigma"], y.values()["sigma"]);
        assert_eq!(x.log_density, y.log_density);
    }
    let first = &a[0].values()["sigma"];
    assert!(a[1..].iter().any(|t| &t.values()["sigma"] != first));
}

const LOCAL_P: f64 = 0.3;
const LOCAL_MU: [f64; 2] = [-1.0, 2.0];
const GRID: [[f64; 2]; 2] = [[0.4, -1.2], [2.3, 1.1]];

fn local_coin(ctx: &mut EnumContext) -> Result<()> {
    ctx.sample("z", SiteSpec::from_dist(Arc::new(Bernoulli::from_probs(scalar(LOCAL_P))?)))?;
    Ok(())
}

fn local_emission(obs: Tensor) -> SiteSpec {
    SiteSpec::new(|a: &Assignment| {
        let d: DistRef = Arc::new(Normal::new(scalar(LOCAL_MU[a.index("z")?]), scalar(1.0))?);
        Ok(d)
    })
    .parents(&["z"])
    .obs(obs)
}

fn grid(rows_are_b: bool) -> Tensor {
    let mut t = ndarray::Array2::from_shape_fn((2, 2), |(i, j)| GRID[i][j]);
    if rows_are_b {
        t = t.reversed_axes().as_standard_layout().into_owned();
    }
    t.into_dyn()
}

#[test]
fn enumerated_parent_outside_plate_prefix_is_rejected() {
    // z lives in plate b; y re-enters b under a, so its stack is [a, b].
    let model = |ctx: &mut EnumContext| -> Result<()> {
        ctx.plate("b", 2, local_coin)?;
        ctx.plate("a", 2, |ctx| {
            ctx.plate("b", 2, |ctx| {
                ctx.sample("y", local_emission(grid(false)))?;
                Ok(())
            })
        })
    };
    let model = config_enumerate(model, EnumMode::Parallel);
    let err = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)), "{err}");
}

#[test]
fn enumerated_parent_in_enclosing_plate_matches_exact_marginal() {
    // Same data with b outermost: y[j, i] = GRID[i][j].
    let model = |ctx: &mut EnumContext| -> Result<()> {
        ctx.plate("b", 2, |ctx| {
            local_coin(ctx)?;
            ctx.plate("a", 2, |ctx| {
                ctx.sample("y", local_emission(grid(true)))?;
                Ok(())
            })
        })
    };
    let model = config_enumerate(model, EnumMode::Parallel);
    let lp = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap();

    let mut exact = 0.0;
    for j in 0..2 {
        let per_b: f64 = [(0usize, 1.0 - LOCAL_P), (1, LOCAL_P)]
            .iter()
            .map(|&(z, pz)| pz * (0..2).map(|i| npdf(GRID[i][j], LOCAL_MU[z], 1.0)).product::<f64>())
            .sum();
        exact += per_b.ln();
    }
    assert_relative_eq!(lp, exact, epsilon = 1e-9);
}
