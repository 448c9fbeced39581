//! Pseudo-equivalent widths between maxima of the smoothed flux.
//!
//! The local continuum is the straight line through the two boundary points.
//! The width is the integral of the fractional deficit `1 - flux / continuum`
//! between the boundaries, and its variance the integral of
//! `(error / continuum)^2 * dwave/dindex` over the same span.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::domain::{IntervalLayout, IntervalResult, Limits, Measurement, SlotResult};
use crate::error::MeasureError;
use crate::features::{Feature, Locations, check_interval_count, warn_interval};
use crate::math::Polynomial;
use crate::math::signal::{gradient, integrate_linear};
use crate::math::stats::mean;
use crate::spectrum::{SplineAnalysis, Spectrum};
use crate::tools::{ContinuumMode, Dependency, Tool};

/// One end of the local continuum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Boundary {
    /// Flux read off the spline of the smoothed flux.
    Wavelength(f64),
    /// Explicit `(wave, flux)`.
    Point(f64, f64),
}

impl Boundary {
    pub fn resolve(&self, spline: &SplineAnalysis) -> (f64, f64) {
        match *self {
            Boundary::Wavelength(w) => (w, spline.eval(w)),
            Boundary::Point(w, f) => (w, f),
        }
    }
}

/// Width and standard error of the deficit under the line through `p0` and `p1`.
pub fn pew(
    wave: &[f64],
    flux: &[f64],
    error: &[f64],
    p0: (f64, f64),
    p1: (f64, f64),
) -> Result<(f64, f64), MeasureError> {
    if wave.len() != flux.len() || wave.len() != error.len() {
        return Err(MeasureError::InvalidInput("pEW arrays differ in length".into()));
    }
    let continuum = Polynomial::through(p0, p1)?;
    let level = continuum.eval_many(wave);

    let deficit: Vec<f64> = flux.iter().zip(&level).map(|(f, c)| 1.0 - f / c).collect();
    let width = integrate_linear(wave, &deficit, p0.0, p1.0);

    let step = gradient(wave);
    let spread: Vec<f64> = error
        .iter()
        .zip(&level)
        .zip(&step)
        .map(|((e, c), dw)| (e / c).powi(2) * dw.abs())
        .collect();
    let var = integrate_linear(wave, &spread, p0.0, p1.0);

    if !width.is_finite() {
        return Err(MeasureError::Numerical(format!(
            "continuum vanishes between {} and {}",
            p0.0, p1.0
        )));
    }
    Ok((width, var.abs().sqrt()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PEwParams {
    pub limits: Vec<Limits>,
    /// Boundary wavelength pairs per interval.
    pub maxima: Vec<Vec<(f64, f64)>>,
}

#[derive(Debug, Clone, Default)]
pub struct PEw {
    params: Option<PEwParams>,
}

impl PEw {
    pub fn new() -> Self {
        Self::default()
    }
}

fn nearest(candidates: &[f64], w: f64) -> Option<f64> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| (a - w).powi(2).total_cmp(&(b - w).powi(2)))
}

/// Boundary flux on the spline, jittered by the continuum error when perturbed.
fn boundary_flux(
    boundary: Boundary,
    spline: &SplineAnalysis,
    continuum_error: f64,
    rng: Option<&mut StdRng>,
) -> (f64, f64) {
    let (w, y) = boundary.resolve(spline);
    match (boundary, rng) {
        (Boundary::Wavelength(_), Some(rng)) => {
            let z: f64 = rng.sample(StandardNormal);
            (w, y + y.abs() * continuum_error * z)
        }
        _ => (w, y),
    }
}

impl Tool for PEw {
    const NAME: &'static str = "width.pew";
    const PARAMETERS: &'static [&'static str] = &["limits", "maxima"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::MethodSmooth, Dependency::SpectrumError];

    type Params = PEwParams;

    fn parameters(&self) -> Option<&PEwParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<PEwParams>) {
        self.params = params;
    }
}

impl Feature for PEw {
    const REPORTS_STDDEV: bool = true;

    fn layout(params: &PEwParams) -> Vec<IntervalLayout> {
        params
            .limits
            .iter()
            .zip(&params.maxima)
            .map(|(l, m)| IntervalLayout { limits: *l, references: vec![None; m.len()] })
            .collect()
    }

    /// Widths measured on the smoothed flux.
    ///
    /// Each requested pair snaps to the spline maxima closest to it inside
    /// the interval; the snapped pairs replace the stored ones.
    fn measure(
        &mut self,
        spectrum: &Spectrum,
        params: PEwParams,
        mode: ContinuumMode,
    ) -> Result<Measurement, MeasureError> {
        Self::check_dependencies(spectrum)?;
        check_interval_count(Self::NAME, params.limits.len(), "maxima", params.maxima.len())?;

        let wave = spectrum.wave();
        let flux = spectrum.smooth()?;
        let error = spectrum.error()?;
        let spline = spectrum.spline()?;
        let all_maxima = spline.maxima();
        let mut rng = mode.rng();

        let mut snapped = params.clone();
        let mut intervals = Vec::with_capacity(params.limits.len());
        for (i, &limits) in params.limits.iter().enumerate() {
            let layout = vec![None; params.maxima[i].len()];
            let maxima: Vec<f64> = all_maxima.iter().copied().filter(|&w| limits.contains(w)).collect();
            if maxima.is_empty() && !layout.is_empty() {
                warn_interval(Self::NAME, limits, &"no flux maxima inside the interval");
                intervals.push(IntervalResult::failed(limits, &layout));
                continue;
            }

            let mut slots = Vec::with_capacity(layout.len());
            for (j, &(w0, ww)) in params.maxima[i].iter().enumerate() {
                let (Some(w0), Some(ww)) = (nearest(&maxima, w0), nearest(&maxima, ww)) else {
                    slots.push(SlotResult::default());
                    continue;
                };
                snapped.maxima[i][j] = (w0, ww);

                let ce = spectrum.continuum_error();
                let p0 = boundary_flux(Boundary::Wavelength(w0), spline, ce, rng.as_mut());
                let p1 = boundary_flux(Boundary::Wavelength(ww), spline, ce, rng.as_mut());
                match pew(wave, flux, error, p0, p1) {
                    Ok((width, stddev)) => slots.push(SlotResult {
                        value: Some(width),
                        stddev: Some(stddev),
                        reference: None,
                    }),
                    Err(err) => {
                        warn_interval(Self::NAME, limits, &err);
                        slots.push(SlotResult::default());
                    }
                }
            }
            log::debug!(
                "{}: [{:.2}, {:.2}] widths={:?}",
                Self::NAME,
                limits.lower,
                limits.upper,
                slots.iter().map(|s| s.value).collect::<Vec<_>>()
            );
            intervals.push(IntervalResult { limits, slots, quality: None });
        }

        self.set_parameters(snapped);
        Ok(Measurement { feature: Self::NAME.to_string(), intervals })
    }

    /// Midpoint of each pair at the mean smoothed flux between them.
    fn locations(&self, spectrum: &Spectrum) -> Result<Locations, MeasureError> {
        let params = self
            .parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        let mut out = Vec::with_capacity(params.maxima.len());
        for pairs in &params.maxima {
            let mut row = Vec::with_capacity(pairs.len());
            for &(w0, ww) in pairs {
                let sub = spectrum.slice(Some(w0.min(ww)), Some(w0.max(ww)));
                row.push(match sub.smooth() {
                    Ok(s) if !s.is_empty() => Some((0.5 * (w0 + ww), mean(s))),
                    _ => None,
                });
            }
            out.push(row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flux 1 with one absorption dip between two bumps at 4400 and 4600.
    fn dipped() -> Spectrum {
        let wave: Vec<f64> = (0..=600).map(|i| 4200.0 + i as f64).collect();
        let smooth: Vec<f64> = wave
            .iter()
            .map(|w| {
                1.0 + 0.05 * (-(w - 4400.0).powi(2) / 800.0).exp() + 0.05 * (-(w - 4600.0).powi(2) / 800.0).exp()
                    - 0.4 * (-(w - 4500.0).powi(2) / 400.0).exp()
            })
            .collect();
        Spectrum::new(wave, smooth.clone())
            .unwrap()
            .with_smooth(Some(smooth))
            .unwrap()
            .with_error(Some(vec![0.01; 601]))
            .unwrap()
    }

    #[test]
    fn flat_feature_has_no_width() {
        let wave: Vec<f64> = (0..=300).map(|i| 4350.0 + i as f64).collect();
        let flux = vec![2.5; wave.len()];
        let error = vec![0.1; wave.len()];
        let (width, stddev) = pew(&wave, &flux, &error, (4400.0, 2.5), (4600.0, 2.5)).unwrap();
        assert!(width.abs() < 1e-12);
        assert!(stddev.is_finite());
        // (0.1 / 2.5)^2 * 200
        assert!((stddev - (0.0016f64 * 200.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn width_does_not_depend_on_grid_direction() {
        let wave: Vec<f64> = (0..=400).map(|i| 4300.0 + i as f64).collect();
        let flux: Vec<f64> = wave.iter().map(|w| 1.0 - 0.5 * (-(w - 4500.0).powi(2) / 200.0).exp()).collect();
        let error = vec![0.01; wave.len()];
        let ascending = pew(&wave, &flux, &error, (4400.0, 1.0), (4600.0, 1.0)).unwrap();

        let rev = |v: &[f64]| v.iter().rev().copied().collect::<Vec<f64>>();
        let descending = pew(&rev(&wave), &rev(&flux), &error, (4400.0, 1.0), (4600.0, 1.0)).unwrap();

        // 0.5 * 10 * sqrt(2 pi) and sqrt(0.01^2 * 200).
        assert!((ascending.0 - 12.533141373155).abs() < 1e-6, "{ascending:?}");
        assert!((ascending.1 - 0.02f64.sqrt()).abs() < 1e-9, "{ascending:?}");
        assert!((descending.0 - ascending.0).abs() < 1e-9, "{descending:?}");
        assert!((descending.1 - ascending.1).abs() < 1e-9, "{descending:?}");
    }

    #[test]
    fn box_deficit_integrates_exactly() {
        let wave: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let flux: Vec<f64> = wave.iter().map(|&w| if (3.0..=7.0).contains(&w) { 0.5 } else { 1.0 }).collect();
        let (width, _) = pew(&wave, &flux, &vec![0.0; 11], (0.0, 1.0), (10.0, 1.0)).unwrap();
        // Trapezoids: 4 * 0.5 inside plus two ramps of 0.25.
        assert!((width - 2.5).abs() < 1e-12);
    }

    #[test]
    fn boundaries_snap_to_maxima() {
        let spectrum = dipped();
        let params = PEwParams { limits: vec![Limits::new(4300.0, 4700.0)], maxima: vec![vec![(4380.0, 4630.0)]] };
        let mut tool = PEw::new();
        let m = tool.measure(&spectrum, params, ContinuumMode::Fixed).unwrap();

        let (w0, ww) = tool.get_parameters().unwrap().maxima[0][0];
        assert!((w0 - 4400.0).abs() < 5.0, "{w0}");
        assert!((ww - 4600.0).abs() < 5.0, "{ww}");

        // Continuum 1.05: (0.05 * 200 - two bump halves + dip area) / 1.05.
        let bumps = 0.05 * 20.0 * (2.0 * std::f64::consts::PI).sqrt();
        let dip = 0.4 * 200f64.sqrt() * (2.0 * std::f64::consts::PI).sqrt();
        let expected = (10.0 - bumps + dip) / 1.05;
        let width = m.values()[0][0].unwrap();
        assert!((width - expected).abs() < 0.1, "{width} vs {expected}");
        assert!(m.stddevs()[0][0].unwrap() > 0.0);
    }

    #[test]
    fn interval_without_maxima_fails_softly() {
        let spectrum = dipped();
        let params = PEwParams { limits: vec![Limits::new(4480.0, 4520.0)], maxima: vec![vec![(4480.0, 4520.0)]] };
        let m = PEw::new().measure(&spectrum, params, ContinuumMode::Fixed).unwrap();
        assert_eq!(m.values(), vec![vec![None]]);
    }

    #[test]
    fn explicit_point_ignores_spline() {
        let spectrum = dipped();
        let spline = spectrum.spline().unwrap();
        assert_eq!(Boundary::Point(4400.0, 3.0).resolve(spline), (4400.0, 3.0));
        let (_, f) = Boundary::Wavelength(4500.0).resolve(spline);
        assert!((f - 0.6).abs() < 0.01);
    }
}
