//! Per-sample error estimation.

pub mod rawsmooth;

pub use rawsmooth::{ONE_SIGMA_COVERAGE, RawSmooth, RawSmoothParams, coverage};
