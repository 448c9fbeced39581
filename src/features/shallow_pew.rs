//! pEW for shallow features, where the maxima are too weak to locate.
//!
//! Each boundary point comes from a straight-line fit to the raw flux over a
//! short flank `[x0, x1]`, evaluated at the flank midpoint. The width is then
//! integrated exactly as in [`pew`](crate::features::pew()).

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::domain::{IntervalLayout, IntervalResult, Limits, Measurement, SlotResult};
use crate::error::MeasureError;
use crate::features::{Feature, Locations, check_interval_count, pew, warn_interval};
use crate::math::polyfit;
use crate::math::stats::mean;
use crate::spectrum::Spectrum;
use crate::tools::{ContinuumMode, Dependency, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShallowPEwParams {
    pub limits: Vec<Limits>,
    /// `[left x0, left x1, right x0, right x1]` flank bounds per feature.
    pub continua: Vec<Vec<[f64; 4]>>,
}

#[derive(Debug, Clone, Default)]
pub struct ShallowPEw {
    params: Option<ShallowPEwParams>,
}

impl ShallowPEw {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuum point at the middle of the flank `[x0, xx]`.
    ///
    /// With `rng`, the flank's flux is scaled by one factor `1 + ce * N(0, 1)`.
    fn flank_point(spectrum: &Spectrum, x0: f64, xx: f64, rng: Option<&mut StdRng>) -> Result<(f64, f64), MeasureError> {
        let factor = match rng {
            Some(rng) => {
                let z: f64 = rng.sample(StandardNormal);
                1.0 + spectrum.continuum_error() * z
            }
            None => 1.0,
        };
        let mid = 0.5 * (x0 + xx);
        let sub = spectrum.slice(Some(x0.min(xx)), Some(x0.max(xx)));
        let flux: Vec<f64> = sub.flux.iter().map(|f| f * factor).collect();

        match polyfit(&sub.wave, &flux, None, 1) {
            Ok(line) if sub.len() >= 2 => Ok((mid, line.eval(mid))),
            _ => {
                let (_, f) = spectrum
                    .nearest(mid)
                    .ok_or_else(|| MeasureError::InvalidSpectrum("empty spectrum".into()))?;
                log::debug!("{}: flank [{x0:.2}, {xx:.2}] too short, using nearest sample", Self::NAME);
                Ok((mid, f * factor))
            }
        }
    }
}

impl Tool for ShallowPEw {
    const NAME: &'static str = "width.shallowpew";
    const PARAMETERS: &'static [&'static str] = &["limits", "continua"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::SpectrumError];

    type Params = ShallowPEwParams;

    fn parameters(&self) -> Option<&ShallowPEwParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<ShallowPEwParams>) {
        self.params = params;
    }
}

impl Feature for ShallowPEw {
    const REPORTS_STDDEV: bool = true;

    fn layout(params: &ShallowPEwParams) -> Vec<IntervalLayout> {
        params
            .limits
            .iter()
            .zip(&params.continua)
            .map(|(l, c)| IntervalLayout { limits: *l, references: vec![None; c.len()] })
            .collect()
    }

    fn measure(
        &mut self,
        spectrum: &Spectrum,
        params: ShallowPEwParams,
        mode: ContinuumMode,
    ) -> Result<Measurement, MeasureError> {
        Self::check_dependencies(spectrum)?;
        check_interval_count(Self::NAME, params.limits.len(), "continua", params.continua.len())?;

        let error = spectrum.error()?;
        let mut rng = mode.rng();
        let mut intervals = Vec::with_capacity(params.limits.len());
        for (i, &limits) in params.limits.iter().enumerate() {
            let mut slots = Vec::with_capacity(params.continua[i].len());
            for c in &params.continua[i] {
                let width = Self::flank_point(spectrum, c[0], c[1], rng.as_mut()).and_then(|p0| {
                    let p1 = Self::flank_point(spectrum, c[2], c[3], rng.as_mut())?;
                    pew(spectrum.wave(), spectrum.flux(), error, p0, p1)
                });
                match width {
                    Ok((value, stddev)) => slots.push(SlotResult {
                        value: Some(value),
                        stddev: Some(stddev),
                        reference: None,
                    }),
                    Err(err) => {
                        warn_interval(Self::NAME, limits, &err);
                        slots.push(SlotResult::default());
                    }
                }
            }
            intervals.push(IntervalResult { limits, slots, quality: None });
        }

        self.set_parameters(params);
        Ok(Measurement { feature: Self::NAME.to_string(), intervals })
    }

    /// Centre of the four flank bounds at the mean flux between the flanks.
    fn locations(&self, spectrum: &Spectrum) -> Result<Locations, MeasureError> {
        let params = self
            .parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        Ok(params
            .continua
            .iter()
            .map(|row| {
                row.iter()
                    .map(|c| {
                        let sub = spectrum.slice(Some(c[1]), Some(c[2]));
                        (!sub.is_empty()).then(|| (mean(c), mean(&sub.flux)))
                    })
                    .collect()
            })
            .collect())
    }
}
