//! # pp-enum
//!
//! Exact marginalization of discrete latent sites.
//!
//! A model declares its sites on an [`EnumContext`]. Discrete sites marked
//! for enumeration become named dimensions of log-space [`Factor`]s; plates
//! add one dimension per conditionally independent batch. Finalizing a trace
//! runs a sum-product elimination through a [`FactorBackend`].
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use pp_core::{tensor::{scalar, vector}, PrngKey};
//! use pp_enum::{config_enumerate, log_density, EnumConfig, EnumContext, EnumMode, SiteSpec};
//! use pp_prob::{Categorical, Normal};
//!
//! let model = config_enumerate(
//!     |ctx: &mut EnumContext| -> pp_core::Result<()> {
//!         ctx.sample("z", SiteSpec::from_dist(Arc::new(Categorical::from_probs(vector(&[0.3, 0.7]))?)))?;
//!         let spec = SiteSpec::new(|a| {
//!             let mu = if a.index("z")? == 0 { -1.0 } else { 1.0 };
//!             let d: pp_prob::DistRef = Arc::new(Normal::new(scalar(mu), scalar(1.0))?);
//!             Ok(d)
//!         });
//!         ctx.sample("y", spec.parents(&["z"]).obs(scalar(0.2)))?;
//!         Ok(())
//!     },
//!     EnumMode::Parallel,
//! );
//! let lp = log_density(&model, &HashMap::new(), &EnumConfig::default(), PrngKey::new(0)).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(feature = "dense-backend"))]
compile_error!("pp-enum needs a factor backend: enable the `dense-backend` feature (on by default)");

pub mod backend;
pub mod config;
pub mod context;
#[cfg(feature = "dense-backend")]
pub mod dense;
pub mod factor;
pub mod infer;

pub use backend::{available_backends, backend_by_name, BackendRef, FactorBackend, ReduceOp};
pub use config::{EnumConfig, EnumMode, InferConfig};
pub use context::{Assignment, DistBuilder, EnumContext, InferFn, Model, Phase, Site, SiteKind, SiteSpec};
#[cfg(feature = "dense-backend")]
pub use dense::DenseBackend;
pub use factor::Factor;
pub use infer::{
    config_enumerate, constrain_params, infer_config, log_density, potential_energy, trace, trace_many, Trace,
};
