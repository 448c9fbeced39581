//! Error estimate from raw-minus-smooth residuals.
//!
//! The absolute residuals are smoothed with a Gaussian kernel to get a local
//! noise scale, which is then rescaled by one factor so that 68.27% of the
//! (unflagged) absolute residuals fall below it: the coverage of a 1-sigma
//! Gaussian error bar.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::signal::{convolve_same, fill_masked, gaussian_window};
use crate::math::stats::percentile;
use crate::math::{SimplexOptions, nelder_mead};
use crate::smooth::keep_mask;
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Tool};

/// Fraction of a normal distribution within one standard deviation.
pub const ONE_SIGMA_COVERAGE: f64 = 0.682689492137;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSmoothParams {
    /// Standard deviation of the Gaussian kernel, in samples.
    pub length: f64,
    #[serde(default)]
    pub flagged: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RawSmooth {
    params: Option<RawSmoothParams>,
}

/// Fraction of kept samples with `|r| < factor * estimate`.
pub fn coverage(abs_residuals: &[f64], estimate: &[f64], keep: &[bool], factor: f64) -> f64 {
    let mut inside = 0usize;
    let mut total = 0usize;
    for ((r, e), k) in abs_residuals.iter().zip(estimate).zip(keep) {
        if *k {
            total += 1;
            if *r < factor * e {
                inside += 1;
            }
        }
    }
    if total == 0 {
        return f64::NAN;
    }
    inside as f64 / total as f64
}

impl RawSmooth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel length of one percent of the sample count.
    pub fn auto(&self, spectrum: &Spectrum) -> Result<RawSmoothParams, MeasureError> {
        Ok(RawSmoothParams {
            length: spectrum.len() as f64 / 100.0,
            flagged: self.params.as_ref().map(|p| p.flagged.clone()).unwrap_or_default(),
        })
    }

    /// Estimate the error and keep `params` as the current parameters.
    pub fn estimate(&mut self, spectrum: &Spectrum, params: RawSmoothParams) -> Result<Vec<f64>, MeasureError> {
        Self::check_dependencies(spectrum)?;
        let error = self.estimate_with(spectrum, &params)?;
        self.set_parameters(params);
        Ok(error)
    }

    pub fn estimate_with(&self, spectrum: &Spectrum, params: &RawSmoothParams) -> Result<Vec<f64>, MeasureError> {
        if !(params.length.is_finite() && params.length > 0.0) {
            return Err(MeasureError::InvalidInput(format!(
                "kernel length must be positive, got {}",
                params.length
            )));
        }
        let smooth = spectrum.smooth()?;
        let keep = keep_mask(spectrum.len(), &params.flagged)?;
        let abs_residuals: Vec<f64> = spectrum
            .flux()
            .iter()
            .zip(smooth)
            .map(|(f, s)| (f - s).abs())
            .collect();
        let filled = fill_masked(spectrum.wave(), &abs_residuals, &keep)?;

        let window = gaussian_window(spectrum.len(), params.length);
        let total: f64 = window.iter().sum();
        let window: Vec<f64> = window.into_iter().map(|w| w / total).collect();
        let estimate = convolve_same(&filled, &window);

        // Start the 1-D search at the empirical quantile of |r| / estimate.
        let ratios: Vec<f64> = filled
            .iter()
            .zip(&estimate)
            .zip(&keep)
            .filter(|((_, e), k)| **k && **e > 0.0)
            .map(|((r, e), _)| r / e)
            .collect();
        let start = if ratios.is_empty() {
            1.0
        } else {
            percentile(&ratios, 100.0 * ONE_SIGMA_COVERAGE)
        };
        let objective =
            |a: &[f64]| (coverage(&filled, &estimate, &keep, a[0]) - ONE_SIGMA_COVERAGE).powi(2);
        let fit = nelder_mead(objective, &[start], SimplexOptions::default())?;
        let factor = fit.x[0];

        log::debug!(
            "raw-smooth error: length={} factor={factor:.4} coverage={:.4}",
            params.length,
            coverage(&filled, &estimate, &keep, factor)
        );
        Ok(estimate.into_iter().map(|e| e * factor).collect())
    }
}

impl Tool for RawSmooth {
    const NAME: &'static str = "error.rawsmooth";
    const PARAMETERS: &'static [&'static str] = &["length", "flagged"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::SpectrumSmooth];

    type Params = RawSmoothParams;

    fn parameters(&self) -> Option<&RawSmoothParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<RawSmoothParams>) {
        self.params = params;
    }
}
