//! Gaussian-kernel smoother, parameterised by the kernel FWHM in samples.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::signal::{convolve_same, gaussian_window};
use crate::smooth::{Smoother, unflagged_flux};
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Tool};

/// `fwhm = std * 2 sqrt(2 ln 2)`.
pub fn fwhm_to_std(fwhm: f64) -> f64 {
    fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt())
}

pub fn std_to_fwhm(std: f64) -> f64 {
    std * 2.0 * (2.0 * std::f64::consts::LN_2).sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub fwhm: f64,
    #[serde(default)]
    pub flagged: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Gaussian {
    params: Option<GaussianParams>,
}

impl Gaussian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length-`n` Gaussian window with the given FWHM, unit sum.
    pub fn window(n: usize, fwhm: f64) -> Result<Vec<f64>, MeasureError> {
        if !(fwhm.is_finite() && fwhm > 0.0) {
            return Err(MeasureError::InvalidInput(format!(
                "gaussian FWHM must be positive, got {fwhm}"
            )));
        }
        let window = gaussian_window(n, fwhm_to_std(fwhm));
        let total: f64 = window.iter().sum();
        Ok(window.into_iter().map(|w| w / total).collect())
    }
}

impl Tool for Gaussian {
    const NAME: &'static str = "smooth.gaussian";
    const PARAMETERS: &'static [&'static str] = &["fwhm", "flagged"];
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Params = GaussianParams;

    fn parameters(&self) -> Option<&GaussianParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<GaussianParams>) {
        self.params = params;
    }
}

impl Smoother for Gaussian {
    fn auto(&self, spectrum: &Spectrum) -> Result<GaussianParams, MeasureError> {
        Ok(GaussianParams {
            fwhm: spectrum.len() as f64 / 100.0,
            flagged: self.params.as_ref().map(|p| p.flagged.clone()).unwrap_or_default(),
        })
    }

    fn smooth_with(&self, spectrum: &Spectrum, params: &GaussianParams) -> Result<Vec<f64>, MeasureError> {
        let flux = unflagged_flux(spectrum, &params.flagged)?;
        let window = Self::window(spectrum.len(), params.fwhm)?;
        log::debug!("gaussian smoothing: fwhm={} flagged={}", params.fwhm, params.flagged.len());
        Ok(convolve_same(&flux, &window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fwhm_conversion() {
        assert!((std_to_fwhm(1.0) - 2.354820045).abs() < 1e-8);
        assert!((fwhm_to_std(std_to_fwhm(3.3)) - 3.3).abs() < 1e-12);
    }

    #[test]
    fn window_half_maximum_matches_fwhm() {
        // Odd length centres the peak on a sample.
        let w = Gaussian::window(201, 20.0).unwrap();
        assert!((w[110] / w[100] - 0.5).abs() < 1e-12);
        assert!((w[90] / w[100] - 0.5).abs() < 1e-12);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn smoothing_reduces_scatter_of_alternating_noise() {
        let wave: Vec<f64> = (0..200).map(|i| 6000.0 + i as f64).collect();
        let flux: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 1.1 } else { 0.9 }).collect();
        let spectrum = Spectrum::new(wave, flux).unwrap();
        let mut g = Gaussian::new();
        let params = g.auto(&spectrum).unwrap();
        assert!((params.fwhm - 2.0).abs() < 1e-12);
        let smooth = g.smooth(&spectrum, params).unwrap();
        for v in &smooth[10..190] {
            assert!((v - 1.0).abs() < 0.02, "{v}");
        }
    }
}
