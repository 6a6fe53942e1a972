//! Probability building blocks for pp.
//!
//! This crate hosts the probability layer shared by the enumeration adapter
//! and the CLI:
//! - a [`Distribution`] trait and a catalog of families (continuous, discrete,
//!   compound and wrapper distributions)
//! - [`Constraint`]s describing admissible domains
//! - transforms/bijectors and the [`biject_to`] registry for constrained
//!   parameterizations
//! - small numeric helpers (stable log/exp/sigmoid primitives)
//!
//! Every family module also exports plain scalar `logpdf`/`logpmf` kernels
//! over `f64`; the distribution structs broadcast them over tensors.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod math;

pub mod constraints;
pub mod distribution;
pub mod registry;
pub mod transforms;

pub mod bernoulli;
pub mod beta;
pub mod binomial;
pub mod categorical;
pub mod cauchy;
pub mod conjugate;
pub mod delta;
pub mod exponential;
pub mod gamma;
pub mod gumbel;
pub mod independent;
pub mod lkj;
pub mod multinomial;
pub mod mvn;
pub mod normal;
pub mod poisson;
pub mod prng_identity;
pub mod random_walk;
pub mod student_t;
pub mod transformed;
pub mod uniform;

pub use constraints::{Constraint, ConstraintKind, CustomConstraint};
pub use distribution::{validate_value, DistRef, Distribution};
pub use registry::{biject_to, register, registry, TransformFactory, TransformRegistry};
pub use transforms::{
    AffineTransform, Bijector, CholeskyProductTransform, ComposeTransform, CorrCholeskyTransform,
    Elementwise, ExpTransform, IdentityTransform, IndependentTransform, InverseTransform,
    LowerCholeskyTransform, OrderedTransform, SigmoidTransform, SoftplusTransform,
    StickBreakingTransform, Transform, TransformRef,
};

pub use bernoulli::Bernoulli;
pub use beta::{Beta, Dirichlet};
pub use binomial::Binomial;
pub use categorical::{Categorical, OrderedLogistic};
pub use cauchy::{Cauchy, HalfCauchy, TruncatedCauchy};
pub use conjugate::{BetaBinomial, GammaPoisson};
pub use delta::{Delta, Unit};
pub use exponential::Exponential;
pub use gamma::{Chi2, Gamma, InverseGamma};
pub use gumbel::{Gumbel, GumbelSoftmaxProbs};
pub use independent::{to_event, Independent};
pub use lkj::{LKJCholesky, LKJ};
pub use multinomial::Multinomial;
pub use mvn::{LowRankMultivariateNormal, MultivariateNormal};
pub use normal::{HalfNormal, Normal, TruncatedNormal};
pub use poisson::{Poisson, ZeroInflatedPoisson};
pub use prng_identity::PrngIdentity;
pub use random_walk::GaussianRandomWalk;
pub use student_t::StudentT;
pub use transformed::{LogNormal, TransformedDistribution};
pub use uniform::{Pareto, Uniform};
