//! Error-weighted smoothing spline through the unflagged samples.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::PenalizedSpline;
use crate::smooth::{Smoother, keep_mask};
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Tool};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmoothingSplineParams {
    #[serde(default)]
    pub flagged: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SmoothingSpline {
    params: Option<SmoothingSplineParams>,
}

impl SmoothingSpline {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tool for SmoothingSpline {
    const NAME: &'static str = "smooth.smoothingspline";
    const PARAMETERS: &'static [&'static str] = &["flagged"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::SpectrumError];

    type Params = SmoothingSplineParams;

    fn parameters(&self) -> Option<&SmoothingSplineParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<SmoothingSplineParams>) {
        self.params = params;
    }
}

impl Smoother for SmoothingSpline {
    fn auto(&self, _spectrum: &Spectrum) -> Result<SmoothingSplineParams, MeasureError> {
        Ok(self.params.clone().unwrap_or_default())
    }

    fn smooth_with(
        &self,
        spectrum: &Spectrum,
        params: &SmoothingSplineParams,
    ) -> Result<Vec<f64>, MeasureError> {
        let error = spectrum.error()?;
        let keep = keep_mask(spectrum.len(), &params.flagged)?;

        // Zero errors would mean infinite weight; use the smallest positive one.
        let floor = error
            .iter()
            .copied()
            .filter(|e| *e > 0.0)
            .fold(f64::INFINITY, f64::min);
        if !floor.is_finite() {
            return Err(MeasureError::InvalidSpectrum("flux error is zero everywhere".into()));
        }

        let mut samples: Vec<(f64, f64, f64)> = spectrum
            .wave()
            .iter()
            .zip(spectrum.flux())
            .zip(error)
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(((&w, &f), &e), _)| (w, f, e.max(floor)))
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, (y, sigma)): (Vec<f64>, (Vec<f64>, Vec<f64>)) =
            samples.into_iter().map(|(w, f, e)| (w, (f, e))).unzip();

        log::debug!("smoothing spline over {} of {} samples", x.len(), spectrum.len());
        let spline = PenalizedSpline::fit(&x, &y, &sigma, None)?;
        Ok(spline.eval_many(spectrum.wave()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn needs_flux_error() {
        let spectrum = Spectrum::new(vec![1.0, 2.0, 3.0, 4.0, 5.0], vec![1.0; 5]).unwrap();
        let err = SmoothingSpline::new()
            .smooth(&spectrum, SmoothingSplineParams::default())
            .unwrap_err();
        assert_eq!(err, MeasureError::MissingDependency("spectrum.error"));
    }

    #[test]
    fn follows_signal_and_ignores_flagged_spike() {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let wave: Vec<f64> = (0..300).map(|i| 5000.0 + 3.0 * i as f64).collect();
        let truth: Vec<f64> = wave.iter().map(|w| 1.0 + 0.3 * ((w - 5000.0) / 100.0).sin()).collect();
        let mut flux: Vec<f64> = truth.iter().map(|t| t + noise.sample(&mut rng)).collect();
        flux[150] += 10.0;
        let spectrum = Spectrum::new(wave, flux)
            .unwrap()
            .with_error(Some(vec![0.05; 300]))
            .unwrap();

        let smooth = SmoothingSpline::new()
            .smooth(&spectrum, SmoothingSplineParams { flagged: vec![150] })
            .unwrap();
        let worst = smooth
            .iter()
            .zip(&truth)
            .map(|(s, t)| (s - t).abs())
            .fold(0.0, f64::max);
        assert!(worst < 0.08, "worst deviation {worst}");
    }
}
