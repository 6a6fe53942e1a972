//! # pp-core
//!
//! Core types shared by the pp crates:
//! - [`Error`] / [`Result`]: the error taxonomy for distributions, constraints,
//!   transforms and enumeration
//! - [`Tensor`] and numpy-style broadcasting helpers
//! - [`PrngKey`]: explicit, splittable randomness

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod rng;
pub mod tensor;

pub use error::{Error, Result};
pub use rng::PrngKey;
pub use tensor::Tensor;

/// pp version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
