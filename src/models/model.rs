//! Gaussian line profiles on a linear continuum.
//!
//! The fitter relies on two primitive operations:
//! - evaluate one Gaussian component
//! - evaluate the full profile (continuum plus every component) on a grid
//!
//! Components can also be built from two on-screen markers, the peak and a
//! half-maximum crossing, which is how a user places an initial guess.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::Polynomial;

/// `HWHM / stddev` for a Gaussian.
pub fn hwhm_factor() -> f64 {
    (2.0 * std::f64::consts::LN_2).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianLine {
    pub amplitude: f64,
    pub x0: f64,
    pub stddev: f64,
}

impl GaussianLine {
    pub fn new(amplitude: f64, x0: f64, stddev: f64) -> Self {
        Self { amplitude, x0, stddev }
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.amplitude * (-(x - self.x0).powi(2) / (2.0 * self.stddev * self.stddev)).exp()
    }

    /// Partial derivatives by `(amplitude, x0, stddev)` at `x`.
    pub fn gradient(&self, x: f64) -> [f64; 3] {
        let s2 = self.stddev * self.stddev;
        let dx = x - self.x0;
        let e = (-dx * dx / (2.0 * s2)).exp();
        let g = self.amplitude * e;
        [e, g * dx / s2, g * dx * dx / (s2 * self.stddev)]
    }

    /// Position right of the centre where the line drops to half its amplitude.
    pub fn half_max_position(&self) -> f64 {
        self.x0 + self.stddev.abs() * hwhm_factor()
    }

    /// Component whose peak sits at `peak` (in flux, continuum included) and
    /// whose half maximum is crossed at `half_max_x`.
    pub fn from_markers(
        peak: (f64, f64),
        half_max_x: f64,
        continuum: &Polynomial,
    ) -> Result<Self, MeasureError> {
        let hwhm = (half_max_x - peak.0).abs();
        if !(hwhm > 0.0 && hwhm.is_finite()) {
            return Err(MeasureError::InvalidInput(format!(
                "half-maximum marker at {half_max_x} coincides with the peak"
            )));
        }
        Ok(Self {
            amplitude: peak.1 - continuum.eval(peak.0),
            x0: peak.0,
            stddev: hwhm / hwhm_factor(),
        })
    }
}

/// Continuum (`[slope, intercept]`) plus all components at `x`.
pub fn profile(x: f64, continuum: &[f64], lines: &[GaussianLine]) -> f64 {
    let base = continuum.iter().fold(0.0, |acc, &c| acc * x + c);
    base + lines.iter().map(|l| l.eval(x)).sum::<f64>()
}

pub fn profile_many(xs: &[f64], continuum: &[f64], lines: &[GaussianLine]) -> Vec<f64> {
    xs.iter().map(|&x| profile(x, continuum, lines)).collect()
}

/// Derivatives of the continuum polynomial by each coefficient, highest
/// power first.
pub fn continuum_gradient(x: f64, degree: usize) -> Vec<f64> {
    (0..=degree).rev().map(|p| x.powi(p as i32)).collect()
}

/// Zip parallel amplitude / centre / width lists into components.
pub fn lines_from(amplitudes: &[f64], x0s: &[f64], stddevs: &[f64]) -> Result<Vec<GaussianLine>, MeasureError> {
    if amplitudes.len() != x0s.len() || x0s.len() != stddevs.len() {
        return Err(MeasureError::InvalidInput(format!(
            "gaussian components disagree in count: {} amplitudes, {} centres, {} widths",
            amplitudes.len(),
            x0s.len(),
            stddevs.len()
        )));
    }
    Ok(amplitudes
        .iter()
        .zip(x0s)
        .zip(stddevs)
        .map(|((&a, &m), &s)| GaussianLine::new(a, m, s))
        .collect())
}
