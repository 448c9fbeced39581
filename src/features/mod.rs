//! Feature fitters: intervals and seeds in, physical measurements out.
//!
//! - [`Gaussians`]: line centres from a multi-component Gaussian fit
//! - [`Minima`]: line centres matched to minima of the smoothed flux
//! - [`PEw`]: pseudo-equivalent widths between flux maxima
//! - [`ShallowPEw`]: pseudo-equivalent widths with fitted flank continua
//!
//! Intervals are independent. A failed interval shows up as `None` slots and
//! a warning naming its bounds; it never aborts the run.

pub mod gaussians;
pub mod minima;
pub mod pew;
pub mod shallow_pew;

pub use gaussians::{Gaussians, GaussiansParams};
pub use minima::{Minima, MinimaParams, match_minima};
pub use pew::{Boundary, PEw, PEwParams, pew};
pub use shallow_pew::{ShallowPEw, ShallowPEwParams};

use crate::domain::{IntervalLayout, Limits, Measurement};
use crate::error::MeasureError;
use crate::spectrum::Spectrum;
use crate::tools::{ContinuumMode, Tool};

/// Marker positions `(wave, flux)` per interval and slot.
pub type Locations = Vec<Vec<Option<(f64, f64)>>>;

pub trait Feature: Tool + Clone + Send + Sync {
    /// Whether measurements carry their own standard errors.
    const REPORTS_STDDEV: bool;

    /// Interval limits and per-slot references implied by `params`.
    fn layout(params: &Self::Params) -> Vec<IntervalLayout>;

    /// Measure every interval and keep the refined parameters.
    ///
    /// `mode` asks for a randomised continuum; it affects only this call.
    fn measure(
        &mut self,
        spectrum: &Spectrum,
        params: Self::Params,
        mode: ContinuumMode,
    ) -> Result<Measurement, MeasureError>;

    /// Measure again with the stored parameters.
    fn remeasure(&mut self, spectrum: &Spectrum, mode: ContinuumMode) -> Result<Measurement, MeasureError> {
        let params = self
            .get_parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        self.measure(spectrum, params, mode)
    }

    /// Marker positions derived from the stored parameters.
    fn locations(&self, spectrum: &Spectrum) -> Result<Locations, MeasureError>;
}

/// Log a failed interval with its bounds.
pub(crate) fn warn_interval(feature: &str, limits: Limits, reason: &dyn std::fmt::Display) {
    log::warn!(
        "{feature}: interval [{:.2}, {:.2}] unavailable: {reason}",
        limits.lower,
        limits.upper
    );
}

/// Check that every per-interval list has one entry per interval.
pub(crate) fn check_interval_count(name: &str, intervals: usize, field: &str, len: usize) -> Result<(), MeasureError> {
    if len != intervals {
        return Err(MeasureError::InvalidInput(format!(
            "{name}: {field} has {len} entries for {intervals} intervals"
        )));
    }
    Ok(())
}
