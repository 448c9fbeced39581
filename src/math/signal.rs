//! 1-D signal helpers shared by the smoothers and width integrators.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use crate::error::MeasureError;

/// Kernel weights below this fraction of the peak are skipped in convolution.
const KERNEL_CUTOFF: f64 = 1e-16;

/// Piecewise-linear interpolation with constant extrapolation.
///
/// `xp` must be increasing. Mirrors the usual `interp(x, xp, fp)` contract.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Result<Vec<f64>, MeasureError> {
    if xp.is_empty() || xp.len() != fp.len() {
        return Err(MeasureError::InvalidInput(
            "interpolation needs matching, non-empty sample arrays".into(),
        ));
    }
    let last = xp.len() - 1;
    Ok(x.iter()
        .map(|&v| {
            if v <= xp[0] {
                return fp[0];
            }
            if v >= xp[last] {
                return fp[last];
            }
            let i = xp.partition_point(|&p| p <= v).saturating_sub(1).min(last - 1);
            let (x0, x1) = (xp[i], xp[i + 1]);
            if x1 <= x0 {
                return fp[i];
            }
            let u = (v - x0) / (x1 - x0);
            fp[i] + u * (fp[i + 1] - fp[i])
        })
        .collect())
}

/// Replace masked-out samples by linear interpolation over the kept ones.
pub fn fill_masked(x: &[f64], y: &[f64], keep: &[bool]) -> Result<Vec<f64>, MeasureError> {
    if keep.iter().all(|&k| k) {
        return Ok(y.to_vec());
    }
    let mut kept: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|((&xi, &yi), _)| (xi, yi))
        .collect();
    kept.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (xp, fp): (Vec<f64>, Vec<f64>) = kept.into_iter().unzip();
    if xp.is_empty() {
        return Err(MeasureError::InvalidInput("every sample is flagged".into()));
    }
    interp(x, &xp, &fp)
}

/// Same-length convolution, centred like `convolve(x, kernel, "same")`.
///
/// Near the edges the output is divided by the kernel mass that overlaps the
/// data, so a constant signal stays constant all the way to the ends.
pub fn convolve_same(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = x.len() as isize;
    let centre = (kernel.len() as isize - 1) / 2;
    let peak = kernel.iter().fold(0.0_f64, |m, w| m.max(w.abs()));
    let taps: Vec<(isize, f64)> = kernel
        .iter()
        .enumerate()
        .filter(|(_, w)| w.abs() > KERNEL_CUTOFF * peak)
        .map(|(k, &w)| (k as isize, w))
        .collect();
    let total: f64 = taps.iter().map(|(_, w)| w).sum();

    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            let mut mass = 0.0;
            for &(k, w) in &taps {
                let j = i + centre - k;
                if (0..n).contains(&j) {
                    acc += w * x[j as usize];
                    mass += w;
                }
            }
            if mass != 0.0 && total != 0.0 {
                acc * total / mass
            } else {
                acc
            }
        })
        .collect()
}

/// Gaussian window of length `m` and standard deviation `std` (in samples).
pub fn gaussian_window(m: usize, std: f64) -> Vec<f64> {
    let centre = (m as f64 - 1.0) / 2.0;
    (0..m)
        .map(|i| {
            let d = (i as f64 - centre) / std;
            (-0.5 * d * d).exp()
        })
        .collect()
}

/// Running median with an odd window; edges use the samples available.
pub fn median_filter(x: &[f64], width: usize) -> Vec<f64> {
    let half = width / 2;
    let n = x.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let mut window: Vec<f64> = x[lo..hi].to_vec();
            window.sort_by(|a, b| a.total_cmp(b));
            let mid = window.len() / 2;
            if window.len() % 2 == 1 {
                window[mid]
            } else {
                0.5 * (window[mid - 1] + window[mid])
            }
        })
        .collect()
}

/// Orthonormal DCT-II, computed through a `2N` FFT of the mirrored signal.
pub fn dct_ortho(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buf: Vec<Complex<f64>> = x
        .iter()
        .chain(x.iter().rev())
        .map(|&v| Complex::new(v, 0.0))
        .collect();
    FftPlanner::new().plan_fft_forward(2 * n).process(&mut buf);

    let nf = n as f64;
    (0..n)
        .map(|k| {
            let phase = Complex::from_polar(1.0, -std::f64::consts::PI * k as f64 / (2.0 * nf));
            let raw = 0.5 * (phase * buf[k]).re;
            let norm = if k == 0 { (1.0 / nf).sqrt() } else { (2.0 / nf).sqrt() };
            raw * norm
        })
        .collect()
}

/// Inverse of [`dct_ortho`] (orthonormal DCT-III).
pub fn idct_ortho(c: &[f64]) -> Vec<f64> {
    let n = c.len();
    if n == 0 {
        return Vec::new();
    }
    let nf = n as f64;
    let mut buf: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); 2 * n];
    for (k, &ck) in c.iter().enumerate() {
        let norm = if k == 0 { (1.0 / nf).sqrt() } else { (2.0 / nf).sqrt() };
        let phase = Complex::from_polar(1.0, std::f64::consts::PI * k as f64 / (2.0 * nf));
        buf[k] = phase * (ck * norm);
    }
    FftPlanner::new().plan_fft_inverse(2 * n).process(&mut buf);
    buf[..n].iter().map(|z| z.re).collect()
}

/// Central-difference derivative of `y` with respect to the sample index.
pub fn gradient(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    y[1] - y[0]
                } else if i == n - 1 {
                    y[n - 1] - y[n - 2]
                } else {
                    0.5 * (y[i + 1] - y[i - 1])
                }
            })
            .collect(),
    }
}

/// Integral of the piecewise-linear interpolant of `(x, f)` from `a` to `b`.
///
/// `x` may run either way. Limits are clipped to the sampled range; `a > b`
/// yields the negated integral.
pub fn integrate_linear(x: &[f64], f: &[f64], a: f64, b: f64) -> f64 {
    if x.len() < 2 || x.len() != f.len() {
        return 0.0;
    }
    if x[0] > x[x.len() - 1] {
        let xs: Vec<f64> = x.iter().rev().copied().collect();
        let fs: Vec<f64> = f.iter().rev().copied().collect();
        return integrate_linear(&xs, &fs, a, b);
    }
    if a > b {
        return -integrate_linear(x, f, b, a);
    }
    let lo = a.max(x[0]);
    let hi = b.min(x[x.len() - 1]);
    if !(hi > lo) {
        return 0.0;
    }
    let value_at = |v: f64| -> f64 {
        let i = x.partition_point(|&p| p <= v).saturating_sub(1).min(x.len() - 2);
        let (x0, x1) = (x[i], x[i + 1]);
        if x1 <= x0 {
            return f[i];
        }
        f[i] + (v - x0) / (x1 - x0) * (f[i + 1] - f[i])
    };

    let mut total = 0.0;
    let mut prev_x = lo;
    let mut prev_f = value_at(lo);
    for (i, &xi) in x.iter().enumerate() {
        if xi <= lo {
            continue;
        }
        if xi >= hi {
            break;
        }
        total += 0.5 * (prev_f + f[i]) * (xi - prev_x);
        prev_x = xi;
        prev_f = f[i];
    }
    total += 0.5 * (prev_f + value_at(hi)) * (hi - prev_x);
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dct_round_trip_and_energy() {
        let x: Vec<f64> = (0..37).map(|i| ((i * i) % 11) as f64 - 3.0).collect();
        let c = dct_ortho(&x);
        let back = idct_ortho(&c);
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-10);
        }
        let ex: f64 = x.iter().map(|v| v * v).sum();
        let ec: f64 = c.iter().map(|v| v * v).sum();
        assert!((ex - ec).abs() < 1e-9 * ex);
    }

    #[test]
    fn dct_of_constant_is_dc_only() {
        let c = dct_ortho(&[2.0; 8]);
        assert!((c[0] - 2.0 * 8f64.sqrt()).abs() < 1e-12);
        assert!(c[1..].iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn convolution_preserves_constant_signal_at_edges() {
        let x = vec![3.0; 25];
        let kernel = gaussian_window(25, 4.0);
        let out = convolve_same(&x, &kernel);
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn interpolation_fills_masked_samples() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 100.0, 2.0, 3.0];
        let filled = fill_masked(&x, &y, &[true, false, true, true]).unwrap();
        assert!((filled[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn linear_integral_clips_and_signs() {
        let x = [0.0, 1.0, 2.0];
        let f = [0.0, 1.0, 0.0];
        assert!((integrate_linear(&x, &f, 0.0, 2.0) - 1.0).abs() < 1e-12);
        assert!((integrate_linear(&x, &f, 0.5, 1.0) - 0.375).abs() < 1e-12);
        assert!((integrate_linear(&x, &f, 2.0, 0.0) + 1.0).abs() < 1e-12);
        assert!((integrate_linear(&x, &f, -5.0, 5.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn linear_integral_ignores_grid_direction() {
        let x = [2.0, 1.5, 1.0, 0.0];
        let f = [0.0, 0.5, 1.0, 0.0];
        assert!((integrate_linear(&x, &f, 0.0, 2.0) - 1.0).abs() < 1e-12);
        assert!((integrate_linear(&x, &f, 0.5, 1.0) - 0.375).abs() < 1e-12);
        assert!((integrate_linear(&x, &f, 2.0, 0.0) + 1.0).abs() < 1e-12);
    }
}
