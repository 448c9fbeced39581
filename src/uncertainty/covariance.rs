//! Analytic propagation from a feature's own standard errors.

use crate::error::MeasureError;
use crate::features::Feature;
use crate::spectrum::Spectrum;
use crate::tools::ContinuumMode;
use crate::uncertainty::{IntervalSummary, Method, SlotSummary, Statistics, UncertaintyReport, in_unit, unit_of};

#[derive(Debug, Clone, Copy, Default)]
pub struct Covariance;

impl Covariance {
    pub fn new() -> Self {
        Self
    }

    /// Measure `feature` once with its stored parameters and treat every
    /// value as normally distributed with its reported standard error.
    ///
    /// With a reference, the spread becomes `v(value + stddev) - v(value)` in
    /// velocity.
    pub fn run<F: Feature>(&self, spectrum: &Spectrum, feature: &mut F) -> Result<UncertaintyReport, MeasureError> {
        if !F::REPORTS_STDDEV {
            return Err(MeasureError::InvalidInput(format!(
                "{} does not report standard errors",
                F::NAME
            )));
        }
        let measurement = feature.remeasure(spectrum, ContinuumMode::Fixed)?;
        log::debug!("covariance: propagating {} intervals of {}", measurement.intervals.len(), F::NAME);

        let intervals = measurement
            .intervals
            .iter()
            .map(|interval| IntervalSummary {
                limits: interval.limits,
                slots: interval
                    .slots
                    .iter()
                    .map(|slot| {
                        let statistics = match (slot.value, slot.stddev) {
                            (Some(value), Some(stddev)) if value.is_finite() && stddev.is_finite() => {
                                let (location, _) = in_unit(value, slot.reference);
                                let (upper, _) = in_unit(value + stddev, slot.reference);
                                Some(Statistics::normal(location, upper - location))
                            }
                            _ => None,
                        };
                        SlotSummary {
                            reference: slot.reference,
                            unit: unit_of(slot.reference),
                            successes: usize::from(statistics.is_some()),
                            trials: 1,
                            statistics,
                        }
                    })
                    .collect(),
            })
            .collect();

        Ok(UncertaintyReport {
            method: Method::Covariance,
            feature: F::NAME.to_string(),
            intervals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Limits, SPEED_OF_LIGHT_KMS, Unit};
    use crate::features::{Gaussians, GaussiansParams, Minima, MinimaParams};
    use crate::models::GaussianLine;
    use crate::tools::Tool;

    fn dip() -> Spectrum {
        let wave: Vec<f64> = (0..=300).map(|i| 6000.0 + i as f64).collect();
        let line = GaussianLine::new(-0.3, 6150.0, 12.0);
        let flux = wave.iter().map(|&w| 1.0 + line.eval(w)).collect();
        Spectrum::new(wave, flux).unwrap().with_error(Some(vec![0.01; 301])).unwrap()
    }

    #[test]
    fn velocity_spread_from_fit_errors() {
        let mut g = Gaussians::new();
        g.set_parameters(GaussiansParams {
            continuum: vec![[0.0, 1.0]],
            amplitudes: vec![vec![-0.25]],
            x0s: vec![vec![6145.0]],
            stddevs: vec![vec![10.0]],
            limits: vec![Limits::new(6080.0, 6220.0)],
            references: vec![vec![Some(6355.0)]],
        });
        let report = Covariance::new().run(&dip(), &mut g).unwrap();
        let slot = report.slot(0, 0).unwrap();
        assert_eq!(slot.unit, Unit::Velocity);
        let s = slot.statistics.as_ref().unwrap();
        let expected = (6150.0 / 6355.0 - 1.0) * SPEED_OF_LIGHT_KMS;
        assert!((s.mean - expected).abs() < 1.0, "{} vs {expected}", s.mean);
        assert!(s.stddev > 0.0);
        assert_eq!(s.mean, s.median);
        assert!(s.min.is_none());
    }

    #[test]
    fn rejects_features_without_errors() {
        let mut minima = Minima::new();
        minima.set_parameters(MinimaParams { limits: vec![], wavelengths: vec![], references: vec![] });
        assert!(matches!(
            Covariance::new().run(&dip(), &mut minima),
            Err(MeasureError::InvalidInput(_))
        ));
    }
}
