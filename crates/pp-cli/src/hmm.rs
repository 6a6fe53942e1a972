//! Gaussian hidden Markov model input for `pp hmm-marginal`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use pp_core::tensor::{logsumexp, scalar, vector};
use pp_enum::{Assignment, EnumContext, SiteSpec};
use pp_prob::{Categorical, DistRef, Normal};
use serde::Deserialize;

/// Discrete-state HMM with per-state Normal emissions.
#[derive(Debug, Clone, Deserialize)]
pub struct HmmInput {
    /// Initial state probabilities.
    pub init: Vec<f64>,
    /// Row-stochastic transition matrix, `transition[from][to]`.
    pub transition: Vec<Vec<f64>>,
    /// Emission mean per state.
    pub emission_loc: Vec<f64>,
    /// Emission scale per state.
    pub emission_scale: Vec<f64>,
    /// Observed sequence.
    pub observations: Vec<f64>,
}

impl HmmInput {
    /// Read and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let hmm: Self = serde_json::from_slice(&bytes)?;
        hmm.validate()?;
        Ok(hmm)
    }

    /// Number of hidden states.
    pub fn num_states(&self) -> usize {
        self.init.len()
    }

    fn validate(&self) -> Result<()> {
        let k = self.num_states();
        if k == 0 {
            bail!("HMM needs at least one state");
        }
        if self.transition.len() != k || self.transition.iter().any(|row| row.len() != k) {
            bail!("transition must be {k}x{k}");
        }
        if self.emission_loc.len() != k || self.emission_scale.len() != k {
            bail!("emission_loc and emission_scale need {k} entries");
        }
        if self.observations.is_empty() {
            bail!("observations are empty");
        }
        Ok(())
    }

    /// Enumeration model: one latent state and one observed emission per
    /// step, inside a first-order markov chain.
    pub fn model(&self) -> impl Fn(&mut EnumContext) -> pp_core::Result<()> + Send + Sync {
        let hmm = Arc::new(self.clone());
        move |ctx: &mut EnumContext| -> pp_core::Result<()> {
            let hmm = hmm.clone();
            ctx.markov_chain(hmm.observations.len(), 1, |ctx, t| {
                let x = format!("x_{}", t);
                let state = if t == 0 {
                    SiteSpec::from_dist(Arc::new(Categorical::from_probs(vector(&hmm.init))?))
                } else {
                    let prev = format!("x_{}", t - 1);
                    let (h, p) = (hmm.clone(), prev.clone());
                    SiteSpec::new(move |a: &Assignment| {
                        let d: DistRef = Arc::new(Categorical::from_probs(vector(&h.transition[a.index(&p)?]))?);
                        Ok(d)
                    })
                    .parents(&[prev.as_str()])
                };
                ctx.sample(&x, state)?;

                let (h, s) = (hmm.clone(), x.clone());
                let emission = SiteSpec::new(move |a: &Assignment| {
                    let i = a.index(&s)?;
                    let d: DistRef =
                        Arc::new(Normal::new(scalar(h.emission_loc[i]), scalar(h.emission_scale[i]))?);
                    Ok(d)
                })
                .parents(&[x.as_str()])
                .obs(scalar(hmm.observations[t]));
                ctx.sample(&format!("y_{}", t), emission)?;
                Ok(())
            })
        }
    }

    /// Log marginal by the forward recursion, for cross-checking.
    pub fn forward_log_marginal(&self) -> Result<f64> {
        let k = self.num_states();
        let emit = |state: usize, y: f64| -> Result<f64> {
            Ok(pp_prob::normal::logpdf(y, self.emission_loc[state], self.emission_scale[state])?)
        };
        let mut alpha = (0..k)
            .map(|s| Ok(self.init[s].ln() + emit(s, self.observations[0])?))
            .collect::<Result<Vec<f64>>>()?;
        for &y in &self.observations[1..] {
            alpha = (0..k)
                .map(|to| {
                    let terms: Vec<f64> =
                        (0..k).map(|from| alpha[from] + self.transition[from][to].ln()).collect();
                    Ok(logsumexp(&terms) + emit(to, y)?)
                })
                .collect::<Result<Vec<f64>>>()?;
        }
        Ok(logsumexp(&alpha))
    }
}
