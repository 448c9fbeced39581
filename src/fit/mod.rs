//! Nonlinear fitting of named parameter groups.
//!
//! Responsibilities:
//!
//! - ravel/unravel named groups for the optimisers
//! - weighted Levenberg–Marquardt fits with held-fixed groups
//! - Nelder–Mead fallback for models without a Jacobian

pub mod fitter;

pub use fitter::*;
