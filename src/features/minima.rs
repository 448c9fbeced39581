//! Line centres matched to minima of the smoothed flux.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::domain::{IntervalLayout, IntervalResult, Limits, Measurement, SlotResult};
use crate::error::MeasureError;
use crate::features::{Feature, Locations, check_interval_count, warn_interval};
use crate::math::Polynomial;
use crate::math::stats::mean;
use crate::spectrum::{SplineAnalysis, Spectrum};
use crate::tools::{ContinuumMode, Dependency, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimaParams {
    pub limits: Vec<Limits>,
    /// Seed wavelengths per interval; `None` marks a slot without a match.
    pub wavelengths: Vec<Vec<Option<f64>>>,
    pub references: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Default)]
pub struct Minima {
    params: Option<MinimaParams>,
}

/// Assign seeds to candidate minima, closest pair first.
///
/// Each round picks the (seed, candidate) pair with the smallest distance
/// among all seeds still waiting, and removes both. Seeds left over when the
/// candidates run out stay `None`, as do `None` seeds.
pub fn match_minima(seeds: &[Option<f64>], candidates: &[f64]) -> Vec<Option<f64>> {
    let mut waiting: Vec<Option<f64>> = seeds.to_vec();
    let mut pool: Vec<f64> = candidates.to_vec();
    let mut matched = vec![None; seeds.len()];

    while !pool.is_empty() {
        let best = waiting
            .iter()
            .enumerate()
            .filter_map(|(k, s)| s.map(|s| (k, s)))
            .filter_map(|(k, s)| {
                pool.iter()
                    .enumerate()
                    .map(|(l, c)| ((c - s).powi(2), l))
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(d, l)| (d, k, l))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let Some((_, k, l)) = best else { break };
        waiting[k] = None;
        matched[k] = Some(pool.remove(l));
    }
    matched
}

impl Minima {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minima inside `limits` after tilting the smoothed flux by a random line.
    ///
    /// The line passes through two normal draws centred on the mean flux of
    /// the interval, at its first and last wavelength.
    fn perturbed_minima(spectrum: &Spectrum, limits: Limits, rng: &mut StdRng) -> Result<Vec<f64>, MeasureError> {
        let sub = spectrum.slice(Some(limits.lower), Some(limits.upper));
        let (x0, xx) = sub
            .bounds()
            .ok_or_else(|| MeasureError::InvalidInput("interval holds no samples".into()))?;
        let loc = mean(&sub.flux);
        let scale = loc.abs() * spectrum.continuum_error();
        let mut draw = || {
            let z: f64 = rng.sample(StandardNormal);
            loc + scale * z
        };
        let (y0, yy) = (draw(), draw());
        let line = Polynomial::through((x0, y0), (xx, yy))?;

        let tilted: Vec<f64> = spectrum
            .smooth()?
            .iter()
            .zip(spectrum.wave())
            .map(|(s, &w)| s - line.eval(w))
            .collect();
        let analysis = SplineAnalysis::new(spectrum.wave(), &tilted)?;
        Ok(inside(&analysis.minima(), limits))
    }
}

fn inside(values: &[f64], limits: Limits) -> Vec<f64> {
    values.iter().copied().filter(|&w| limits.contains(w)).collect()
}

impl MinimaParams {
    fn validate(&self) -> Result<(), MeasureError> {
        let n = self.limits.len();
        check_interval_count(Minima::NAME, n, "wavelengths", self.wavelengths.len())?;
        check_interval_count(Minima::NAME, n, "references", self.references.len())?;
        for (i, (w, r)) in self.wavelengths.iter().zip(&self.references).enumerate() {
            if w.len() != r.len() {
                return Err(MeasureError::InvalidInput(format!(
                    "{}: interval {i} has {} wavelengths and {} references",
                    Minima::NAME,
                    w.len(),
                    r.len()
                )));
            }
        }
        Ok(())
    }
}

impl Tool for Minima {
    const NAME: &'static str = "velocity.minima";
    const PARAMETERS: &'static [&'static str] = &["limits", "wavelengths", "references"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::MethodSmooth];

    type Params = MinimaParams;

    fn parameters(&self) -> Option<&MinimaParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<MinimaParams>) {
        self.params = params;
    }
}

impl Feature for Minima {
    const REPORTS_STDDEV: bool = false;

    fn layout(params: &MinimaParams) -> Vec<IntervalLayout> {
        params
            .limits
            .iter()
            .zip(&params.references)
            .map(|(l, r)| IntervalLayout { limits: *l, references: r.clone() })
            .collect()
    }

    fn measure(
        &mut self,
        spectrum: &Spectrum,
        params: MinimaParams,
        mode: ContinuumMode,
    ) -> Result<Measurement, MeasureError> {
        Self::check_dependencies(spectrum)?;
        params.validate()?;

        let mut rng = mode.rng();
        let fixed_minima = match rng {
            Some(_) => Vec::new(),
            None => spectrum.spline()?.minima(),
        };

        let mut matched = params.clone();
        let mut intervals = Vec::with_capacity(params.limits.len());
        for (i, &limits) in params.limits.iter().enumerate() {
            let candidates = match rng.as_mut() {
                Some(rng) => match Self::perturbed_minima(spectrum, limits, rng) {
                    Ok(c) => c,
                    Err(err) => {
                        warn_interval(Self::NAME, limits, &err);
                        intervals.push(IntervalResult::failed(limits, &params.references[i]));
                        continue;
                    }
                },
                None => inside(&fixed_minima, limits),
            };

            let found = match_minima(&params.wavelengths[i], &candidates);
            if found.iter().zip(&params.wavelengths[i]).any(|(f, s)| s.is_some() && f.is_none()) {
                warn_interval(Self::NAME, limits, &"fewer minima than seed wavelengths");
            }
            log::debug!("{}: [{:.2}, {:.2}] minima={:?}", Self::NAME, limits.lower, limits.upper, found);

            intervals.push(IntervalResult {
                limits,
                slots: found
                    .iter()
                    .zip(&params.references[i])
                    .map(|(v, r)| SlotResult { value: *v, stddev: None, reference: *r })
                    .collect(),
                quality: None,
            });
            matched.wavelengths[i] = found;
        }

        self.set_parameters(matched);
        Ok(Measurement { feature: Self::NAME.to_string(), intervals })
    }

    /// Matched minima on the spline of the smoothed flux.
    fn locations(&self, spectrum: &Spectrum) -> Result<Locations, MeasureError> {
        let params = self
            .parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        let spline = spectrum.spline()?;
        Ok(params
            .wavelengths
            .iter()
            .map(|ws| ws.iter().map(|w| w.map(|w| (w, spline.eval(w)))).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_dips() -> Spectrum {
        let wave: Vec<f64> = (0..400).map(|i| 5000.0 + i as f64).collect();
        let smooth: Vec<f64> = wave
            .iter()
            .map(|w| {
                1.0 - 0.3 * (-(w - 5100.0).powi(2) / 200.0).exp() - 0.5 * (-(w - 5250.0).powi(2) / 300.0).exp()
            })
            .collect();
        Spectrum::new(wave, smooth.clone())
            .unwrap()
            .with_smooth(Some(smooth))
            .unwrap()
    }

    #[test]
    fn coincident_seeds_are_kept() {
        let seeds = [Some(2.0), Some(7.0)];
        assert_eq!(match_minima(&seeds, &[1.0, 2.0, 5.0, 7.0]), vec![Some(2.0), Some(7.0)]);
        assert_eq!(match_minima(&seeds, &[7.0, 5.0, 2.0, 1.0]), vec![Some(2.0), Some(7.0)]);
    }

    #[test]
    fn closest_pair_wins_first() {
        // 4.9 is closer to seed 5 than to seed 4, so seed 4 falls back to 3.
        let out = match_minima(&[Some(4.0), Some(5.0)], &[3.0, 4.9]);
        assert_eq!(out, vec![Some(3.0), Some(4.9)]);
    }

    #[test]
    fn extra_seeds_stay_unmatched() {
        let out = match_minima(&[Some(1.0), None, Some(9.0)], &[8.5]);
        assert_eq!(out, vec![None, None, Some(8.5)]);
    }

    #[test]
    fn finds_both_dips() {
        let spectrum = two_dips();
        let params = MinimaParams {
            limits: vec![Limits::new(5050.0, 5300.0)],
            wavelengths: vec![vec![Some(5255.0), Some(5090.0)]],
            references: vec![vec![Some(6355.0), None]],
        };
        let mut minima = Minima::new();
        let m = minima.measure(&spectrum, params, ContinuumMode::Fixed).unwrap();
        let v = m.values();
        assert!((v[0][0].unwrap() - 5250.0).abs() < 0.5);
        assert!((v[0][1].unwrap() - 5100.0).abs() < 0.5);
        assert_eq!(m.intervals[0].slots[0].reference, Some(6355.0));
        assert_eq!(minima.get_parameters().unwrap().wavelengths[0][0], v[0][0]);

        let loc = minima.locations(&spectrum).unwrap();
        assert!((loc[0][0].unwrap().1 - 0.5).abs() < 0.01);
    }

    #[test]
    fn perturbation_leaves_spectrum_alone() {
        let spectrum = two_dips().with_continuum_error(0.001).unwrap();
        let before = spectrum.smooth().unwrap().to_vec();
        let params = MinimaParams {
            limits: vec![Limits::new(5050.0, 5300.0)],
            wavelengths: vec![vec![Some(5250.0)]],
            references: vec![vec![None]],
        };
        let m = Minima::new()
            .measure(&spectrum, params, ContinuumMode::Perturbed { seed: 3 })
            .unwrap();
        assert!((m.values()[0][0].unwrap() - 5250.0).abs() < 2.0);
        assert_eq!(spectrum.smooth().unwrap(), before.as_slice());
    }

    #[test]
    fn needs_smoothed_flux() {
        let spectrum = Spectrum::new(vec![1.0, 2.0, 3.0], vec![1.0; 3]).unwrap();
        let params = MinimaParams { limits: vec![], wavelengths: vec![], references: vec![] };
        let err = Minima::new().measure(&spectrum, params, ContinuumMode::Fixed).unwrap_err();
        assert_eq!(err, MeasureError::MissingDependency("method.smooth"));
    }
}
