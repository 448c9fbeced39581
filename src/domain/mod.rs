//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - interval limits and measurement results (`Limits`, `SlotResult`, `Measurement`)
//! - the output layout shared by fitters and uncertainty engines
//! - units and the wavelength-to-velocity conversion

pub mod types;

pub use types::*;
