//! Extrema analysis of the smoothed flux.
//!
//! Three interpolating splines are fit to the same samples:
//!
//! - degree 3 for the curve itself
//! - degree 4, differentiated once, for the slope
//! - degree 5, differentiated twice, for the curvature
//!
//! so each derivative comes from a fit of sufficient order instead of
//! differentiating one low-order fit repeatedly.

use crate::error::MeasureError;
use crate::math::BSpline;

#[derive(Debug, Clone)]
pub struct SplineAnalysis {
    curve: BSpline,
    slope: BSpline,
    curvature: BSpline,
    extrema: Vec<f64>,
    inflection_points: Vec<f64>,
}

impl SplineAnalysis {
    /// Fit the three splines to `(wave, smooth)`.
    ///
    /// `wave` must be strictly monotonic; a decreasing grid is reversed first.
    pub fn new(wave: &[f64], smooth: &[f64]) -> Result<Self, MeasureError> {
        if wave.len() != smooth.len() {
            return Err(MeasureError::InvalidSpectrum(
                "smoothed flux does not match the wavelength grid".into(),
            ));
        }
        let (x, y) = if wave.windows(2).all(|w| w[1] > w[0]) {
            (wave.to_vec(), smooth.to_vec())
        } else if wave.windows(2).all(|w| w[1] < w[0]) {
            (
                wave.iter().rev().copied().collect(),
                smooth.iter().rev().copied().collect(),
            )
        } else {
            return Err(MeasureError::InvalidSpectrum(
                "spline analysis needs a strictly monotonic wavelength grid".into(),
            ));
        };

        let curve = BSpline::interpolate(&x, &y, 3)?;
        let slope = BSpline::interpolate(&x, &y, 4)?.derivative()?;
        let curvature = BSpline::interpolate(&x, &y, 5)?.nth_derivative(2)?;
        let extrema = slope.roots();
        let inflection_points = curvature.roots();

        log::debug!(
            "spline analysis: {} extrema, {} inflection points over [{:.2}, {:.2}]",
            extrema.len(),
            inflection_points.len(),
            x[0],
            x[x.len() - 1]
        );

        Ok(Self {
            curve,
            slope,
            curvature,
            extrema,
            inflection_points,
        })
    }

    /// Interpolated smoothed flux at `w`.
    pub fn eval(&self, w: f64) -> f64 {
        self.curve.eval(w)
    }

    pub fn eval_many(&self, ws: &[f64]) -> Vec<f64> {
        self.curve.eval_many(ws)
    }

    /// Curve (`0`), slope (`1`) or curvature (`2`).
    pub fn derivative(&self, order: usize) -> Result<&BSpline, MeasureError> {
        match order {
            0 => Ok(&self.curve),
            1 => Ok(&self.slope),
            2 => Ok(&self.curvature),
            _ => Err(MeasureError::InvalidInput(format!(
                "only derivatives of order 0, 1 and 2 are available, got {order}"
            ))),
        }
    }

    /// Roots of the slope, increasing.
    pub fn extrema(&self) -> &[f64] {
        &self.extrema
    }

    /// Roots of the curvature, increasing.
    pub fn inflection_points(&self) -> &[f64] {
        &self.inflection_points
    }

    pub fn minima(&self) -> Vec<f64> {
        self.extrema
            .iter()
            .copied()
            .filter(|&w| self.curvature.eval(w) > 0.0)
            .collect()
    }

    pub fn maxima(&self) -> Vec<f64> {
        self.extrema
            .iter()
            .copied()
            .filter(|&w| self.curvature.eval(w) < 0.0)
            .collect()
    }

    /// Outgoing inflection points between consecutive extrema.
    ///
    /// Between each pair of neighbouring extrema, when at least two inflection
    /// points fall in the span, the 2nd, 4th, ... of them are kept.
    pub fn shoulders(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for pair in self.extrema.windows(2) {
            let inside: Vec<f64> = self
                .inflection_points
                .iter()
                .copied()
                .filter(|&p| pair[0] <= p && p <= pair[1])
                .collect();
            if inside.len() > 1 {
                out.extend(inside.iter().skip(1).step_by(2));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave() -> Vec<f64> {
        (0..400).map(|i| 4000.0 + 2.5 * i as f64).collect()
    }

    #[test]
    fn classifies_minima_and_maxima() {
        let w = wave();
        let s: Vec<f64> = w.iter().map(|&v| 1.0 + 0.3 * ((v - 4000.0) / 80.0).sin()).collect();
        let spline = SplineAnalysis::new(&w, &s).unwrap();

        let period = 2.0 * std::f64::consts::PI * 80.0;
        for m in spline.minima() {
            let phase = ((m - 4000.0) / period).fract();
            assert!((phase - 0.75).abs() < 1e-3, "minimum at {m}");
        }
        for m in spline.maxima() {
            let phase = ((m - 4000.0) / period).fract();
            assert!((phase - 0.25).abs() < 1e-3, "maximum at {m}");
        }
        assert_eq!(spline.minima().len() + spline.maxima().len(), spline.extrema().len());
    }

    #[test]
    fn decreasing_grid_is_reversed() {
        let w: Vec<f64> = wave().into_iter().rev().collect();
        let s: Vec<f64> = w.iter().map(|&v| ((v - 4500.0) / 50.0).powi(2)).collect();
        let spline = SplineAnalysis::new(&w, &s).unwrap();
        let minima = spline.minima();
        assert_eq!(minima.len(), 1);
        assert!((minima[0] - 4500.0).abs() < 1e-6);
    }

    #[test]
    fn shoulders_keep_outgoing_inflections() {
        // slope (1 - t^2)(t^2 + 0.1): extrema at t = ±1, curvature
        // 2t(0.9 - 2t^2) vanishes at t = 0 and t = ±sqrt(0.45).
        let centre = 4501.25;
        let scale = 200.0;
        let w = wave();
        let s: Vec<f64> = w
            .iter()
            .map(|&v| {
                let t = (v - centre) / scale;
                0.9 * t.powi(3) / 3.0 + 0.1 * t - t.powi(5) / 5.0
            })
            .collect();
        let spline = SplineAnalysis::new(&w, &s).unwrap();

        let extrema = spline.extrema();
        assert_eq!(extrema.len(), 2, "{extrema:?}");
        assert!((extrema[0] - (centre - scale)).abs() < 1e-2);
        assert!((extrema[1] - (centre + scale)).abs() < 1e-2);

        let offset = 0.45f64.sqrt() * scale;
        let expected = [centre - offset, centre, centre + offset];
        let inflections = spline.inflection_points();
        assert_eq!(inflections.len(), 3, "{inflections:?}");
        for (got, want) in inflections.iter().zip(expected) {
            assert!((got - want).abs() < 1e-2, "{got} vs {want}");
        }

        let shoulders = spline.shoulders();
        assert_eq!(shoulders, vec![inflections[1]]);
        assert!((shoulders[0] - centre).abs() < 1e-2);
        assert!(spline.derivative(3).is_err());
    }

    #[test]
    fn non_monotonic_grid_is_rejected() {
        let err = SplineAnalysis::new(&[1.0, 3.0, 2.0, 4.0, 5.0, 6.0, 7.0], &[0.0; 7]).unwrap_err();
        assert!(matches!(err, MeasureError::InvalidSpectrum(_)));
    }
}
