//! Spectrum data and the spline analysis of its smoothed flux.

pub mod container;
pub mod spline;

pub use container::{ResamplingDistribution, Spectrum, SubSpectrum};
pub use spline::SplineAnalysis;
