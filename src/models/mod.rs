//! Line-profile models used by the Gaussian feature fitter.

pub mod model;

pub use model::*;
