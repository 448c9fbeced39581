//! Boxcar (running mean) smoother with continuous, non-integer widths.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::signal::convolve_same;
use crate::smooth::{Smoother, unflagged_flux};
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxcarParams {
    /// Window width in samples; fractional widths taper the two edge bins.
    pub width: f64,
    #[serde(default)]
    pub flagged: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Boxcar {
    params: Option<BoxcarParams>,
}

impl Boxcar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length-`n` centred rectangular window of total width `width`, unit sum.
    ///
    /// The integer part fills whole bins; half of the fractional remainder goes
    /// to each bin just outside the box. When the parity of the box differs
    /// from `n`, one whole bin is traded for two half bins so the window stays
    /// symmetric.
    pub fn window(n: usize, width: f64) -> Result<Vec<f64>, MeasureError> {
        if !(width > 0.0 && width < n as f64) {
            return Err(MeasureError::InvalidInput(format!(
                "boxcar width must lie in (0, {n}), got {width}"
            )));
        }
        let n_i = n as i64;
        let mut boxed = width.floor() as i64;
        let mut tail = width.fract() / 2.0;
        if n_i % 2 != boxed % 2 {
            boxed -= 1;
            tail += 0.5;
        }
        let start = (n_i - boxed) / 2;
        let stop = start + boxed;

        let mut window = vec![0.0; n];
        for i in start.max(0)..stop.min(n_i) {
            window[i as usize] = 1.0;
        }
        for edge in [start - 1, stop] {
            if (0..n_i).contains(&edge) {
                window[edge as usize] = tail;
            }
        }

        let total: f64 = window.iter().sum();
        if total <= 0.0 {
            return Err(MeasureError::Numerical(format!("empty boxcar window for width {width}")));
        }
        Ok(window.into_iter().map(|w| w / total).collect())
    }
}

impl Tool for Boxcar {
    const NAME: &'static str = "smooth.boxcar";
    const PARAMETERS: &'static [&'static str] = &["width", "flagged"];
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Params = BoxcarParams;

    fn parameters(&self) -> Option<&BoxcarParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<BoxcarParams>) {
        self.params = params;
    }
}

impl Smoother for Boxcar {
    /// One percent of the sample count.
    fn auto(&self, spectrum: &Spectrum) -> Result<BoxcarParams, MeasureError> {
        Ok(BoxcarParams {
            width: spectrum.len() as f64 / 100.0,
            flagged: self.params.as_ref().map(|p| p.flagged.clone()).unwrap_or_default(),
        })
    }

    fn smooth_with(&self, spectrum: &Spectrum, params: &BoxcarParams) -> Result<Vec<f64>, MeasureError> {
        let flux = unflagged_flux(spectrum, &params.flagged)?;
        let window = Self::window(spectrum.len(), params.width)?;
        log::debug!("boxcar smoothing: width={} flagged={}", params.width, params.flagged.len());
        Ok(convolve_same(&flux, &window))
    }
}
