//! Smoothers: raw flux in, denoised flux out.
//!
//! Every smoother follows the same recipe:
//!
//! 1. flagged samples are replaced by linear interpolation over the others
//! 2. the result is filtered (convolution, frequency-domain gain or a
//!    smoothing spline)
//! 3. the smoothed flux is returned; applying it with `Spectrum::set_smooth`
//!    is the caller's call

pub mod boxcar;
pub mod gaussian;
pub mod lowpass;
pub mod spline;

pub use boxcar::{Boxcar, BoxcarParams};
pub use gaussian::{Gaussian, GaussianParams};
pub use lowpass::{LowPass, LowPassParams};
pub use spline::{SmoothingSpline, SmoothingSplineParams};

use crate::error::MeasureError;
use crate::math::signal::fill_masked;
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Header, Tool};

pub trait Smoother: Tool {
    /// Data-driven default parameters.
    fn auto(&self, spectrum: &Spectrum) -> Result<Self::Params, MeasureError>;

    /// Smoothed flux for `params`, leaving the smoother's state alone.
    fn smooth_with(&self, spectrum: &Spectrum, params: &Self::Params) -> Result<Vec<f64>, MeasureError>;

    /// Smooth with `params` and keep them as the current parameters.
    fn smooth(&mut self, spectrum: &Spectrum, params: Self::Params) -> Result<Vec<f64>, MeasureError> {
        Self::check_dependencies(spectrum)?;
        let out = self.smooth_with(spectrum, &params)?;
        self.set_parameters(params);
        Ok(out)
    }

    /// Smooth again with the stored parameters (e.g. on a resampled flux).
    fn resmooth(&self, spectrum: &Spectrum) -> Result<Vec<f64>, MeasureError> {
        let params = self
            .parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        Self::check_dependencies(spectrum)?;
        self.smooth_with(spectrum, params)
    }
}

/// `true` for samples that take part in the fit.
pub(crate) fn keep_mask(n: usize, flagged: &[usize]) -> Result<Vec<bool>, MeasureError> {
    let mut keep = vec![true; n];
    for &i in flagged {
        let slot = keep.get_mut(i).ok_or_else(|| {
            MeasureError::InvalidInput(format!("flagged index {i} is outside a spectrum of {n} samples"))
        })?;
        *slot = false;
    }
    Ok(keep)
}

/// Flux with flagged samples interpolated over.
pub(crate) fn unflagged_flux(spectrum: &Spectrum, flagged: &[usize]) -> Result<Vec<f64>, MeasureError> {
    let keep = keep_mask(spectrum.len(), flagged)?;
    fill_masked(spectrum.wave(), spectrum.flux(), &keep)
}

/// Any of the four smoothers, for callers that pick one at run time.
#[derive(Debug, Clone)]
pub enum SmoothMethod {
    Boxcar(Boxcar),
    Gaussian(Gaussian),
    LowPass(LowPass),
    SmoothingSpline(SmoothingSpline),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            SmoothMethod::Boxcar($s) => $body,
            SmoothMethod::Gaussian($s) => $body,
            SmoothMethod::LowPass($s) => $body,
            SmoothMethod::SmoothingSpline($s) => $body,
        }
    };
}

fn name_of<T: Tool>(_: &T) -> &'static str {
    T::NAME
}

fn dependencies_of<T: Tool>(_: &T) -> &'static [Dependency] {
    T::DEPENDENCIES
}

impl SmoothMethod {
    pub fn name(&self) -> &'static str {
        dispatch!(self, s => name_of(s))
    }

    pub fn dependencies(&self) -> &'static [Dependency] {
        dispatch!(self, s => dependencies_of(s))
    }

    pub fn has_parameters(&self) -> bool {
        dispatch!(self, s => s.parameters().is_some())
    }

    /// Store the smoother's automatic parameters and return the smoothed flux.
    pub fn smooth_auto(&mut self, spectrum: &Spectrum) -> Result<Vec<f64>, MeasureError> {
        dispatch!(self, s => {
            let params = s.auto(spectrum)?;
            s.smooth(spectrum, params)
        })
    }

    pub fn resmooth(&self, spectrum: &Spectrum) -> Result<Vec<f64>, MeasureError> {
        dispatch!(self, s => s.resmooth(spectrum))
    }

    pub fn update_header(&self, header: &mut Header) -> Result<(), MeasureError> {
        dispatch!(self, s => s.update_header(header))
    }

    pub fn set_parameters_from_header(&mut self, header: &Header) -> Result<(), MeasureError> {
        dispatch!(self, s => s.set_parameters_from_header(header))
    }
}
