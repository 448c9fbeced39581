//! The spectrum container.
//!
//! A `Spectrum` owns the wavelength grid, the raw flux and (optionally) a
//! per-sample error and a smoothed flux. Wavelengths are kept twice: as
//! observed and in the rest frame `wave / (1 + z)`. All tools work in the rest
//! frame.
//!
//! Two derived quantities are memoised:
//!
//! - the spline analysis of the smoothed flux (dropped by `set_flux`,
//!   `set_smooth` and `set_redshift`)
//! - a quadratic continuum fit to the flux (dropped by `set_flux` and
//!   `set_redshift`)

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::OnceLock;

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::{Polynomial, polyfit};
use crate::spectrum::SplineAnalysis;
use crate::tools::Header;

/// Per-sample noise draw used by [`Spectrum::sample`].
///
/// `Uniform` adds `error * U[0, 1)`, matching the historical behaviour;
/// `Gaussian` adds `error * N(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingDistribution {
    #[default]
    Uniform,
    Gaussian,
}

impl FromStr for ResamplingDistribution {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "gaussian" | "normal" => Ok(Self::Gaussian),
            other => Err(MeasureError::InvalidInput(format!(
                "unknown resampling distribution '{other}' (expected uniform or gaussian)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spectrum {
    observed_wave: Vec<f64>,
    wave: Vec<f64>,
    flux: Vec<f64>,
    error: Option<Vec<f64>>,
    smooth: Option<Vec<f64>>,
    redshift: f64,
    continuum_error: f64,
    spline: OnceLock<SplineAnalysis>,
    continuum: OnceLock<Polynomial>,
}

/// Read-only copy of an inclusive wavelength range of a [`Spectrum`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubSpectrum {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub error: Option<Vec<f64>>,
    pub smooth: Option<Vec<f64>>,
    pub redshift: f64,
    pub continuum_error: f64,
}

/// `None`, all-zero and all-NaN arrays all mean "not known".
fn is_absent(values: &[f64]) -> bool {
    values.iter().all(|v| *v == 0.0) || values.iter().all(|v| v.is_nan())
}

impl Spectrum {
    pub fn new(wave: Vec<f64>, flux: Vec<f64>) -> Result<Self, MeasureError> {
        if wave.iter().any(|w| !w.is_finite()) {
            return Err(MeasureError::InvalidSpectrum(
                "wavelength includes non-finite values".into(),
            ));
        }
        let mut spectrum = Self {
            wave: wave.clone(),
            observed_wave: wave,
            flux: Vec::new(),
            error: None,
            smooth: None,
            redshift: 0.0,
            continuum_error: 0.0,
            spline: OnceLock::new(),
            continuum: OnceLock::new(),
        };
        spectrum.set_flux(flux)?;
        Ok(spectrum)
    }

    pub fn with_error(mut self, error: Option<Vec<f64>>) -> Result<Self, MeasureError> {
        self.set_error(error)?;
        Ok(self)
    }

    pub fn with_smooth(mut self, smooth: Option<Vec<f64>>) -> Result<Self, MeasureError> {
        self.set_smooth(smooth)?;
        Ok(self)
    }

    pub fn with_redshift(mut self, z: f64) -> Result<Self, MeasureError> {
        self.set_redshift(z)?;
        Ok(self)
    }

    pub fn with_continuum_error(mut self, fraction: f64) -> Result<Self, MeasureError> {
        self.set_continuum_error(fraction)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Rest-frame wavelengths.
    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    pub fn observed_wave(&self) -> &[f64] {
        &self.observed_wave
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn redshift(&self) -> f64 {
        self.redshift
    }

    pub fn continuum_error(&self) -> f64 {
        self.continuum_error
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_smooth(&self) -> bool {
        self.smooth.is_some()
    }

    pub fn error(&self) -> Result<&[f64], MeasureError> {
        self.error
            .as_deref()
            .ok_or(MeasureError::Unavailable("flux error"))
    }

    pub fn smooth(&self) -> Result<&[f64], MeasureError> {
        self.smooth
            .as_deref()
            .ok_or(MeasureError::Unavailable("smoothed flux"))
    }

    fn invalidate(&mut self) {
        self.spline = OnceLock::new();
        self.continuum = OnceLock::new();
    }

    /// Replace the flux; drops the smoothed flux and every cache.
    pub fn set_flux(&mut self, flux: Vec<f64>) -> Result<(), MeasureError> {
        if flux.iter().any(|v| !v.is_finite()) {
            return Err(MeasureError::InvalidSpectrum(
                "flux includes non-finite values".into(),
            ));
        }
        if flux.len() != self.observed_wave.len() {
            return Err(MeasureError::InvalidSpectrum(format!(
                "flux has {} samples but the wavelength grid has {}",
                flux.len(),
                self.observed_wave.len()
            )));
        }
        self.flux = flux;
        self.smooth = None;
        self.invalidate();
        Ok(())
    }

    pub fn set_redshift(&mut self, z: f64) -> Result<(), MeasureError> {
        if !z.is_finite() || z <= -1.0 {
            return Err(MeasureError::InvalidInput(format!("invalid redshift {z}")));
        }
        self.redshift = z;
        self.wave = self.observed_wave.iter().map(|w| w / (1.0 + z)).collect();
        self.invalidate();
        Ok(())
    }

    pub fn set_continuum_error(&mut self, fraction: f64) -> Result<(), MeasureError> {
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(MeasureError::InvalidInput(format!(
                "continuum error must be a non-negative fraction, got {fraction}"
            )));
        }
        self.continuum_error = fraction;
        Ok(())
    }

    pub fn set_error(&mut self, error: Option<Vec<f64>>) -> Result<(), MeasureError> {
        self.error = match error {
            None => None,
            Some(e) if is_absent(&e) => None,
            Some(e) => {
                if e.len() != self.len() {
                    return Err(MeasureError::InvalidSpectrum(format!(
                        "error has {} samples but the spectrum has {}",
                        e.len(),
                        self.len()
                    )));
                }
                if e.iter().any(|v| !v.is_finite()) {
                    return Err(MeasureError::InvalidSpectrum(
                        "error includes non-finite values".into(),
                    ));
                }
                if e.iter().any(|v| *v < 0.0) {
                    return Err(MeasureError::InvalidSpectrum(
                        "error includes negative values".into(),
                    ));
                }
                Some(e)
            }
        };
        Ok(())
    }

    /// Replace the smoothed flux; always drops the spline cache.
    pub fn set_smooth(&mut self, smooth: Option<Vec<f64>>) -> Result<(), MeasureError> {
        self.smooth = match smooth {
            None => None,
            Some(s) if is_absent(&s) => None,
            Some(s) => {
                if s.len() != self.len() {
                    return Err(MeasureError::InvalidSpectrum(format!(
                        "smoothed flux has {} samples but the spectrum has {}",
                        s.len(),
                        self.len()
                    )));
                }
                if s.iter().any(|v| !v.is_finite()) {
                    return Err(MeasureError::InvalidSpectrum(
                        "smoothed flux includes non-finite values".into(),
                    ));
                }
                Some(s)
            }
        };
        self.spline = OnceLock::new();
        Ok(())
    }

    /// Spline analysis of the smoothed flux, built on first use.
    pub fn spline(&self) -> Result<&SplineAnalysis, MeasureError> {
        if let Some(spline) = self.spline.get() {
            return Ok(spline);
        }
        let built = SplineAnalysis::new(&self.wave, self.smooth()?)?;
        Ok(self.spline.get_or_init(|| built))
    }

    /// Quadratic fit to the flux, built on first use.
    pub fn continuum(&self) -> Result<&Polynomial, MeasureError> {
        if let Some(c) = self.continuum.get() {
            return Ok(c);
        }
        let built = polyfit(&self.wave, &self.flux, None, 2)?;
        Ok(self.continuum.get_or_init(|| built))
    }

    /// One random realisation of the flux: `flux + error * draw`.
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        distribution: ResamplingDistribution,
    ) -> Result<Vec<f64>, MeasureError> {
        let error = self.error()?;
        Ok(self
            .flux
            .iter()
            .zip(error)
            .map(|(f, e)| {
                let draw: f64 = match distribution {
                    ResamplingDistribution::Uniform => rng.gen_range(0.0..1.0),
                    ResamplingDistribution::Gaussian => rng.sample(StandardNormal),
                };
                f + e * draw
            })
            .collect())
    }

    /// Indices whose rest wavelength lies in `[start, stop]`.
    pub fn range_indices(&self, start: f64, stop: f64) -> Vec<usize> {
        self.wave
            .iter()
            .enumerate()
            .filter(|(_, w)| start <= **w && **w <= stop)
            .map(|(i, _)| i)
            .collect()
    }

    /// Inclusive sub-range `[start, stop]` in rest wavelength.
    ///
    /// `None` bounds default to the shortest and longest wavelength. Samples
    /// keep their grid order.
    pub fn slice(&self, start: Option<f64>, stop: Option<f64>) -> SubSpectrum {
        let lowest = self.wave.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = self.wave.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let idx = self.range_indices(start.unwrap_or(lowest), stop.unwrap_or(highest));
        let pick = |v: &[f64]| idx.iter().map(|&i| v[i]).collect::<Vec<f64>>();
        SubSpectrum {
            wave: pick(&self.wave),
            flux: pick(&self.flux),
            error: self.error.as_deref().map(pick),
            smooth: self.smooth.as_deref().map(pick),
            redshift: self.redshift,
            continuum_error: self.continuum_error,
        }
    }

    /// `(wave, flux)` at a sample index.
    pub fn at(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.wave.get(index)?, *self.flux.get(index)?))
    }

    /// Index of the sample closest to `w`.
    pub fn nearest_index(&self, w: f64) -> Option<usize> {
        self.wave
            .iter()
            .enumerate()
            .min_by(|a, b| ((a.1 - w).powi(2)).total_cmp(&(b.1 - w).powi(2)))
            .map(|(i, _)| i)
    }

    /// `(wave, flux)` of the sample closest to `w`.
    pub fn nearest(&self, w: f64) -> Option<(f64, f64)> {
        self.nearest_index(w).and_then(|i| self.at(i))
    }

    /// Whitespace-delimited `wave flux error smooth` rows under a header line.
    ///
    /// Absent columns are written as `nan`.
    pub fn to_table(&self, header: &Header) -> String {
        let mut out = header.to_line();
        out.push('\n');
        for i in 0..self.len() {
            let err = self.error.as_ref().map_or(f64::NAN, |e| e[i]);
            let smo = self.smooth.as_ref().map_or(f64::NAN, |s| s[i]);
            let _ = writeln!(
                out,
                "{:.18e} {:.18e} {:.18e} {:.18e}",
                self.wave[i], self.flux[i], err, smo
            );
        }
        out
    }
}

impl SubSpectrum {
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    pub fn error(&self) -> Result<&[f64], MeasureError> {
        self.error
            .as_deref()
            .ok_or(MeasureError::Unavailable("flux error"))
    }

    pub fn smooth(&self) -> Result<&[f64], MeasureError> {
        self.smooth
            .as_deref()
            .ok_or(MeasureError::Unavailable("smoothed flux"))
    }

    /// Shortest and longest wavelength, whatever the grid direction.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let first = *self.wave.first()?;
        let last = *self.wave.last()?;
        Some((first.min(last), first.max(last)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spectrum() -> Spectrum {
        let wave: Vec<f64> = (0..50).map(|i| 5000.0 + i as f64).collect();
        let flux: Vec<f64> = wave.iter().map(|w| 1.0 + 1e-3 * (w - 5000.0)).collect();
        Spectrum::new(wave, flux).unwrap()
    }

    #[test]
    fn rejects_non_finite_flux_and_length_mismatch() {
        let err = Spectrum::new(vec![1.0, 2.0], vec![1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidSpectrum(_)));
        let err = Spectrum::new(vec![1.0, 2.0], vec![1.0]).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidSpectrum(_)));
    }

    #[test]
    fn empty_like_error_means_absent() {
        let mut s = spectrum();
        s.set_error(Some(vec![0.0; 50])).unwrap();
        assert!(!s.has_error());
        s.set_error(Some(vec![f64::NAN; 50])).unwrap();
        assert!(!s.has_error());
        assert_eq!(s.error().unwrap_err(), MeasureError::Unavailable("flux error"));
        assert!(s.set_error(Some(vec![1.0; 49])).is_err());
    }

    #[test]
    fn redshift_moves_rest_frame_only() {
        let s = spectrum().with_redshift(1.0).unwrap();
        assert_eq!(s.observed_wave()[0], 5000.0);
        assert_eq!(s.wave()[0], 2500.0);
    }

    #[test]
    fn set_flux_invalidates_smooth_and_spline() {
        let mut s = spectrum();
        s.set_smooth(Some(s.flux().to_vec())).unwrap();
        assert!(s.spline().is_ok());
        s.set_flux(vec![2.0; 50]).unwrap();
        assert!(!s.has_smooth());
        assert!(s.spline().unwrap_err().is_prerequisite());
        assert!((s.continuum().unwrap().eval(5010.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn slice_is_inclusive() {
        let s = spectrum();
        let sub = s.slice(Some(5010.0), Some(5020.0));
        assert_eq!(sub.len(), 11);
        assert_eq!(sub.bounds(), Some((5010.0, 5020.0)));
        assert!(sub.error.is_none());
    }

    #[test]
    fn open_slice_of_decreasing_grid_keeps_everything() {
        let wave: Vec<f64> = (0..50).map(|i| 5049.0 - i as f64).collect();
        let s = Spectrum::new(wave.clone(), vec![1.0; 50]).unwrap();
        let sub = s.slice(None, None);
        assert_eq!(sub.wave, wave);
        assert_eq!(sub.bounds(), Some((5000.0, 5049.0)));
        assert_eq!(s.slice(Some(5010.0), Some(5020.0)).len(), 11);
    }

    #[test]
    fn nearest_falls_back_to_closest_wavelength() {
        let s = spectrum();
        assert_eq!(s.at(3).map(|p| p.0), Some(5003.0));
        assert_eq!(s.at(500), None);
        assert_eq!(s.nearest(5012.4).map(|p| p.0), Some(5012.0));
    }

    #[test]
    fn uniform_sample_stays_within_one_error() {
        let s = spectrum().with_error(Some(vec![0.1; 50])).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let draw = s.sample(&mut rng, ResamplingDistribution::Uniform).unwrap();
        for (d, f) in draw.iter().zip(s.flux()) {
            assert!(*d >= *f && *d < f + 0.1);
        }
        assert_eq!(
            "Gaussian".parse::<ResamplingDistribution>().unwrap(),
            ResamplingDistribution::Gaussian
        );
    }
}
