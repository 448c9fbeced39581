//! Frequency-domain low-pass smoother.
//!
//! The flux is divided by a quadratic continuum and taken to the frequency
//! domain with an orthonormal DCT. Its log power spectrum is modelled as a
//! flat noise floor plus a linear ramp below a signal bin:
//!
//! ```text
//! log P(k) = noise                                  k >= signal / 1.5
//! log P(k) = noise + slope * (k - signal / 1.5)     k <  signal / 1.5
//! ```
//!
//! Smoothing applies the soft gain `S / (S + N)` per bin, with `S` the
//! extrapolated signal power and `N = 10^noise`, then transforms back and
//! multiplies the continuum in again.

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::math::signal::{convolve_same, dct_ortho, idct_ortho, median_filter};
use crate::math::stats::median;
use crate::math::{SimplexOptions, nelder_mead, polyfit};
use crate::smooth::{Smoother, unflagged_flux};
use crate::spectrum::Spectrum;
use crate::tools::{Dependency, Tool};

/// Knee of the power model sits at `signal / KNEE_DIVISOR`.
const KNEE_DIVISOR: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowPassParams {
    /// First frequency bin dominated by noise.
    pub signal: usize,
    /// `log10` of the noise power floor.
    pub noise: f64,
    /// Log-power slope of the signal ramp; derived from the data when `None`.
    pub slope: Option<f64>,
    #[serde(default)]
    pub flagged: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LowPass {
    params: Option<LowPassParams>,
}

/// DCT of the continuum-normalised flux and its power.
#[derive(Debug, Clone)]
struct PowerSpectrum {
    continuum: Vec<f64>,
    coefficients: Vec<f64>,
    power: Vec<f64>,
    log_power: Vec<f64>,
}

impl PowerSpectrum {
    fn new(spectrum: &Spectrum, flagged: &[usize]) -> Result<Self, MeasureError> {
        let flux = unflagged_flux(spectrum, flagged)?;
        let continuum = polyfit(spectrum.wave(), &flux, None, 2)?.eval_many(spectrum.wave());
        if continuum.iter().any(|c| *c == 0.0 || !c.is_finite()) {
            return Err(MeasureError::Numerical(
                "quadratic continuum crosses zero; cannot normalise the flux".into(),
            ));
        }
        let normalised: Vec<f64> = flux.iter().zip(&continuum).map(|(f, c)| f / c).collect();
        let coefficients = dct_ortho(&normalised);
        let power: Vec<f64> = coefficients.iter().map(|c| c * c).collect();
        let log_power = power.iter().map(|p| safe_log10(*p)).collect();
        Ok(Self {
            continuum,
            coefficients,
            power,
            log_power,
        })
    }
}

fn safe_log10(v: f64) -> f64 {
    v.max(f64::MIN_POSITIVE).log10()
}

/// Two-segment model of the log power spectrum.
pub fn power_model(bin: f64, signal: f64, noise: f64, slope: f64) -> f64 {
    let knee = signal / KNEE_DIVISOR;
    if bin < knee {
        slope * (bin - knee) + noise
    } else {
        noise
    }
}

impl LowPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-bin gain `S / (S + N)` for the given parameters.
    fn gain(ps: &PowerSpectrum, params: &LowPassParams) -> Result<Vec<f64>, MeasureError> {
        let n = ps.power.len();
        let signal = params.signal;
        if signal == 0 || signal >= n {
            return Err(MeasureError::InvalidInput(format!(
                "low-pass signal bin must lie in [1, {n}), got {signal}"
            )));
        }
        let head = (signal * 2 / 3).max(1);
        let lpwr0 = safe_log10(2.0 * ps.power[..head].iter().sum::<f64>() / head as f64);
        let slope = params
            .slope
            .filter(|s| s.is_finite())
            .unwrap_or((ps.log_power[signal] - lpwr0) / signal as f64);

        // S / (S + N) written as 1 / (1 + N / S) so huge exponents saturate cleanly.
        Ok((0..n)
            .map(|k| {
                let ratio = 10f64.powf(params.noise - lpwr0 - slope * k as f64);
                1.0 / (1.0 + ratio)
            })
            .collect())
    }
}

impl Tool for LowPass {
    const NAME: &'static str = "smooth.lowpass";
    const PARAMETERS: &'static [&'static str] = &["signal", "noise", "slope", "flagged"];
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Params = LowPassParams;

    fn parameters(&self) -> Option<&LowPassParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<LowPassParams>) {
        self.params = params;
    }
}

impl Smoother for LowPass {
    /// Fit the power model to the median- then boxcar-filtered log power.
    fn auto(&self, spectrum: &Spectrum) -> Result<LowPassParams, MeasureError> {
        let flagged = self.params.as_ref().map(|p| p.flagged.clone()).unwrap_or_default();
        let ps = PowerSpectrum::new(spectrum, &flagged)?;
        let n = ps.power.len();

        let filtered = convolve_same(&median_filter(&ps.power, 3), &[1.0 / 7.0; 7]);
        let lpwrs: Vec<f64> = filtered.iter().map(|p| safe_log10(*p)).collect();

        let noise0 = median(&ps.log_power);
        let lmax = ps.log_power.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lmin = ps.log_power.iter().copied().fold(f64::INFINITY, f64::min);
        let signal0 = lpwrs
            .iter()
            .position(|&v| v < noise0)
            .unwrap_or(n / 10)
            .max(1) as f64;
        let slope0 = (noise0 - lmax) / signal0;

        let objective = |a: &[f64]| -> f64 {
            lpwrs
                .iter()
                .enumerate()
                .map(|(k, &v)| (v - power_model(k as f64, a[0], a[1], a[2])).powi(2))
                .sum()
        };
        let fit = nelder_mead(objective, &[signal0, noise0, slope0], SimplexOptions::default())?;
        let (mut signal, mut noise, slope) = (fit.x[0], fit.x[1], fit.x[2]);

        if !signal.is_finite() || signal < 1.0 || signal >= n as f64 {
            signal = (0.1 * n as f64).floor().max(1.0);
        }
        if !noise.is_finite() || noise < lmin || noise > lmax {
            noise = noise0;
        }
        log::debug!("low-pass auto: signal={signal:.1} noise={noise:.3} slope={slope:.4}");

        Ok(LowPassParams {
            signal: signal as usize,
            noise,
            slope: slope.is_finite().then_some(slope),
            flagged,
        })
    }

    fn smooth_with(&self, spectrum: &Spectrum, params: &LowPassParams) -> Result<Vec<f64>, MeasureError> {
        let ps = PowerSpectrum::new(spectrum, &params.flagged)?;
        let gain = Self::gain(&ps, params)?;
        let filtered: Vec<f64> = ps.coefficients.iter().zip(&gain).map(|(c, g)| c * g).collect();
        Ok(idct_ortho(&filtered)
            .into_iter()
            .zip(&ps.continuum)
            .map(|(v, c)| v * c)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn noisy_spectrum() -> (Spectrum, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let wave: Vec<f64> = (0..512).map(|i| 4000.0 + 2.0 * i as f64).collect();
        let truth: Vec<f64> = (0..512)
            .map(|i| 1.0 + 0.2 * (2.0 * std::f64::consts::PI * i as f64 / 128.0).sin())
            .collect();
        let flux = truth.iter().map(|t| t + noise.sample(&mut rng)).collect();
        (Spectrum::new(wave, flux).unwrap(), truth)
    }

    fn rms(a: &[f64], b: &[f64]) -> f64 {
        (a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len() as f64).sqrt()
    }

    #[test]
    fn suppresses_white_noise_above_signal_bin() {
        let (spectrum, truth) = noisy_spectrum();
        let mut lp = LowPass::new();
        let params = LowPassParams {
            signal: 40,
            noise: (0.02f64 * 0.02).log10(),
            slope: None,
            flagged: Vec::new(),
        };
        let smooth = lp.smooth(&spectrum, params).unwrap();
        assert!(rms(&smooth, &truth) < 0.5 * rms(spectrum.flux(), &truth));
    }

    #[test]
    fn auto_parameters_are_in_range() {
        let (spectrum, _) = noisy_spectrum();
        let mut lp = LowPass::new();
        let params = lp.auto(&spectrum).unwrap();
        assert!(params.signal >= 1 && params.signal < spectrum.len());
        assert!(params.noise.is_finite());
        let smooth = lp.smooth(&spectrum, params).unwrap();
        assert!(smooth.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_out_of_range_signal_bin() {
        let (spectrum, _) = noisy_spectrum();
        let params = LowPassParams { signal: 0, noise: -3.0, slope: None, flagged: Vec::new() };
        assert!(LowPass::new().smooth_with(&spectrum, &params).is_err());
    }

    #[test]
    fn power_model_is_flat_above_knee() {
        assert_eq!(power_model(30.0, 30.0, -3.0, -0.1), -3.0);
        assert!((power_model(0.0, 30.0, -3.0, -0.1) - (-1.0)).abs() < 1e-12);
    }
}
