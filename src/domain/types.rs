//! Shared measurement types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - produced by every feature fitter
//! - consumed by the uncertainty engines
//! - exported as JSON next to the reports

use serde::{Deserialize, Serialize};

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// `(value / reference - 1) * c`.
pub fn to_velocity(wavelength: f64, reference: f64) -> f64 {
    (wavelength / reference - 1.0) * SPEED_OF_LIGHT_KMS
}

/// Unit of a reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Whatever the spectrum's wavelength axis uses.
    #[default]
    Native,
    /// km/s, after converting a wavelength against a rest reference.
    Velocity,
}

impl Unit {
    pub fn label(&self) -> &'static str {
        match self {
            Unit::Native => "",
            Unit::Velocity => "km/s",
        }
    }
}

/// Inclusive wavelength interval `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub lower: f64,
    pub upper: f64,
}

impl Limits {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, w: f64) -> bool {
        self.lower <= w && w <= self.upper
    }
}

impl From<(f64, f64)> for Limits {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

/// One measured quantity (a line centre, a minimum, a width).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotResult {
    /// `None` when the fit for this slot failed or found nothing.
    pub value: Option<f64>,
    pub stddev: Option<f64>,
    /// Rest wavelength for a velocity conversion.
    pub reference: Option<f64>,
}

/// Results of one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalResult {
    pub limits: Limits,
    pub slots: Vec<SlotResult>,
    /// Reduced chi-square or similar; `None` when not defined or failed.
    pub quality: Option<f64>,
}

impl IntervalResult {
    /// Every slot unavailable, keeping the references.
    pub fn failed(limits: Limits, references: &[Option<f64>]) -> Self {
        Self {
            limits,
            slots: references
                .iter()
                .map(|r| SlotResult { value: None, stddev: None, reference: *r })
                .collect(),
            quality: None,
        }
    }
}

/// Shape of a feature's output: intervals and per-slot references.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalLayout {
    pub limits: Limits,
    pub references: Vec<Option<f64>>,
}

/// Everything one feature run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub feature: String,
    pub intervals: Vec<IntervalResult>,
}

impl Measurement {
    /// All slots unavailable, shaped like `layout`.
    pub fn failed(feature: &str, layout: &[IntervalLayout]) -> Self {
        Self {
            feature: feature.to_string(),
            intervals: layout
                .iter()
                .map(|l| IntervalResult::failed(l.limits, &l.references))
                .collect(),
        }
    }

    pub fn values(&self) -> Vec<Vec<Option<f64>>> {
        self.intervals
            .iter()
            .map(|i| i.slots.iter().map(|s| s.value).collect())
            .collect()
    }

    pub fn stddevs(&self) -> Vec<Vec<Option<f64>>> {
        self.intervals
            .iter()
            .map(|i| i.slots.iter().map(|s| s.stddev).collect())
            .collect()
    }

    pub fn qualities(&self) -> Vec<Option<f64>> {
        self.intervals.iter().map(|i| i.quality).collect()
    }

    pub fn layout(&self) -> Vec<IntervalLayout> {
        self.intervals
            .iter()
            .map(|i| IntervalLayout {
                limits: i.limits,
                references: i.slots.iter().map(|s| s.reference).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_of_rest_wavelength_is_zero() {
        assert_eq!(to_velocity(6355.0, 6355.0), 0.0);
        let v = to_velocity(6100.0, 6355.0);
        assert!((v + 12_029.44).abs() < 0.01, "{v}");
    }

    #[test]
    fn failed_measurement_keeps_shape() {
        let layout = vec![
            IntervalLayout { limits: Limits::new(1.0, 2.0), references: vec![None, Some(5.0)] },
            IntervalLayout { limits: Limits::new(3.0, 4.0), references: vec![None] },
        ];
        let m = Measurement::failed("velocity.minima", &layout);
        assert_eq!(m.values(), vec![vec![None, None], vec![None]]);
        assert_eq!(m.layout(), layout);
    }
}
