//! Uncertainty propagation for feature measurements.
//!
//! Two engines produce the same [`UncertaintyReport`]:
//!
//! - [`MonteCarlo`] re-measures the feature on resampled spectra and reports
//!   empirical statistics of the outcomes
//! - [`Covariance`] trusts the feature's own standard errors and derives the
//!   sigma bands from a normal distribution
//!
//! Slots that carry a rest-wavelength reference are converted to velocities
//! before any statistic is taken, so every rendering of a report shows the
//! same numbers.

pub mod covariance;
pub mod montecarlo;

pub use covariance::Covariance;
pub use montecarlo::MonteCarlo;

use serde::{Deserialize, Serialize};

use crate::domain::{Limits, Unit, to_velocity};
use crate::error::MeasureError;
use crate::math::stats::{mean, median, percentile_sorted, std_dev};

/// Lower and upper percentiles of the 1, 2 and 3 sigma bands.
pub const SIGMA_PERCENTILES: [(f64, f64); 3] = [
    (31.7310507863, 68.2689492137),
    (4.5500263896, 95.4499736104),
    (0.2699796063, 99.7300203937),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    MonteCarlo,
    Covariance,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::MonteCarlo => "uncertainty.montecarlo",
            Method::Covariance => "uncertainty.covariance",
        }
    }
}

/// Summary statistics of one slot, in the slot's reporting unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Sample extremes; `None` for analytic propagation.
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    /// `(lower, upper)` for 1, 2 and 3 sigma.
    pub bands: [(f64, f64); 3],
}

impl Statistics {
    /// Empirical statistics; `None` without samples.
    pub fn from_samples(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let band = |(lo, hi): (f64, f64)| (percentile_sorted(&sorted, lo), percentile_sorted(&sorted, hi));
        Some(Self {
            min: sorted.first().copied(),
            max: sorted.last().copied(),
            mean: mean(values),
            median: median(values),
            stddev: std_dev(values),
            bands: SIGMA_PERCENTILES.map(band),
        })
    }

    /// Normal distribution with the given location and spread.
    pub fn normal(location: f64, stddev: f64) -> Self {
        let band = |(lo, hi): (f64, f64)| {
            (
                crate::math::stats::normal_quantile(lo / 100.0, location, stddev),
                crate::math::stats::normal_quantile(hi / 100.0, location, stddev),
            )
        };
        Self {
            min: None,
            max: None,
            mean: location,
            median: location,
            stddev,
            bands: SIGMA_PERCENTILES.map(band),
        }
    }

    /// Half the width of each sigma band.
    pub fn half_widths(&self) -> [f64; 3] {
        self.bands.map(|(lo, hi)| 0.5 * (hi - lo).abs())
    }
}

/// Result of one (interval, slot) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub reference: Option<f64>,
    pub unit: Unit,
    /// Trials in which the slot was measured.
    pub successes: usize,
    pub trials: usize,
    /// `None` when the slot was never measured.
    pub statistics: Option<Statistics>,
}

impl SlotSummary {
    pub fn success_rate(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.successes as f64 / self.trials as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub limits: Limits,
    pub slots: Vec<SlotSummary>,
}

/// What an uncertainty engine hands to the reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyReport {
    pub method: Method,
    /// Name of the measured feature.
    pub feature: String,
    pub intervals: Vec<IntervalSummary>,
}

impl UncertaintyReport {
    pub fn slot(&self, i: usize, j: usize) -> Result<&SlotSummary, MeasureError> {
        self.intervals
            .get(i)
            .and_then(|interval| interval.slots.get(j))
            .ok_or_else(|| MeasureError::InvalidInput(format!("no result for interval {i}, slot {j}")))
    }

    /// Interval-grouped `mean stddev` table.
    pub fn to_ascii(&self) -> String {
        crate::report::format_ascii(self)
    }

    /// Nested record with every statistic.
    pub fn to_json(&self) -> Result<String, MeasureError> {
        crate::report::format_json(self)
    }

    /// Operator-facing text block for one slot.
    pub fn summary(&self, i: usize, j: usize) -> Result<String, MeasureError> {
        Ok(crate::report::format_summary(self.method, self.slot(i, j)?))
    }
}

/// Velocity against `reference`, or the value itself.
pub(crate) fn in_unit(value: f64, reference: Option<f64>) -> (f64, Unit) {
    match reference {
        Some(r) => (to_velocity(value, r), Unit::Velocity),
        None => (value, Unit::Native),
    }
}

pub(crate) fn unit_of(reference: Option<f64>) -> Unit {
    in_unit(0.0, reference).1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_samples_collapse() {
        let s = Statistics::from_samples(&[3.5; 40]).unwrap();
        assert_eq!(s.mean, 3.5);
        assert_eq!(s.median, 3.5);
        assert_eq!(s.stddev, 0.0);
        assert_eq!(s.bands, [(3.5, 3.5); 3]);
        assert!(Statistics::from_samples(&[]).is_none());
    }

    #[test]
    fn normal_bands_are_symmetric() {
        let s = Statistics::normal(10.0, 2.0);
        let [one, two, three] = s.half_widths();
        assert!(one < two && two < three);
        // The 95.45th percentile sits 1.69 sigma above the mean.
        assert!((two - 2.0 * 1.6901).abs() < 1e-3, "{two}");
        for (lo, hi) in s.bands {
            assert!((lo + hi - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn references_switch_units() {
        assert_eq!(in_unit(5.0, None), (5.0, Unit::Native));
        let (v, unit) = in_unit(6355.0, Some(6355.0));
        assert_eq!((v, unit), (0.0, Unit::Velocity));
    }
}
