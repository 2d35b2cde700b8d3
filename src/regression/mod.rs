//! Bayesian hierarchical regression using Gibbs sampling.
//!
//! This module provides a sampler for linear models whose coefficients vary by
//! subject around a group mean. The sampler works on the non-centred
//! parameterisation, and the conditionals it needs are either Gaussian or
//! one-dimensional, so every update is exact or a short Metropolis walk.
//!
//! # Available Models
//! - [`HierarchicalRegression`]: per-subject coefficients and noise scales with a shared group prior
//!
//! # Examples
//! See the `demos` directory for complete usage examples.

pub use hierarchical::{HierarchicalRegression, HierarchicalResults};

mod hierarchical;
