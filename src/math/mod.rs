//! Numerical building blocks.
//!
//! - weighted least squares and polynomial fits
//! - banded linear solves
//! - interpolating B-splines and the error-weighted smoothing spline
//! - Nelder–Mead and Levenberg–Marquardt minimisers
//! - 1-D signal helpers (interpolation, convolution, DCT)
//! - descriptive statistics

pub mod banded;
pub mod bspline;
pub mod levmar;
pub mod ols;
pub mod penalized;
pub mod signal;
pub mod simplex;
pub mod stats;

pub use bspline::BSpline;
pub use levmar::{LmResult, levenberg_marquardt};
pub use ols::{Polynomial, polyfit};
pub use penalized::PenalizedSpline;
pub use simplex::{SimplexOptions, SimplexResult, nelder_mead};
