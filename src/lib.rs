//! `misfits` library crate: spectral feature measurements in noisy transient
//! spectra.
//!
//! The numerical engine only; plotting, interactive marker placement, file
//! formats and command-line handling live in front-ends that call into:
//!
//! - [`spectrum`] for the data container and its spline analysis
//! - [`smooth`] and [`noise`] to denoise the flux and estimate its error
//! - [`features`] to measure line velocities and pseudo-equivalent widths
//! - [`uncertainty`] and [`report`] to propagate and present the errors

pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod fit;
pub mod math;
pub mod models;
pub mod noise;
pub mod pipeline;
pub mod report;
pub mod smooth;
pub mod spectrum;
pub mod tools;
pub mod uncertainty;

pub use config::EngineConfig;
pub use error::MeasureError;
pub use spectrum::Spectrum;
