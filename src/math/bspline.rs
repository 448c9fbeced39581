//! Interpolating B-splines of arbitrary degree.
//!
//! `interpolate` places knots the way classic interpolating-spline codes do
//! (FITPACK with zero smoothing):
//!
//! - odd degree `k`: interior knots at the data abscissae `x[(k+1)/2 .. n-(k+1)/2]`
//! - even degree `k`: interior knots at midpoints between consecutive abscissae
//!
//! with `k+1` repeated boundary knots at each end. The collocation system is
//! banded and totally positive, so it is solved without pivoting.
//!
//! Outside the data range the end polynomial pieces are extrapolated.

use crate::error::MeasureError;
use crate::math::banded::BandedMatrix;

/// Subdivisions per knot span when bracketing roots.
const ROOT_SUBDIVISIONS: usize = 8;

#[derive(Debug, Clone)]
pub struct BSpline {
    knots: Vec<f64>,
    coefs: Vec<f64>,
    degree: usize,
}

impl BSpline {
    /// Build the spline of degree `k` interpolating `(x, y)`.
    ///
    /// `x` must be strictly increasing with more than `k` samples.
    pub fn interpolate(x: &[f64], y: &[f64], k: usize) -> Result<Self, MeasureError> {
        let n = x.len();
        if n != y.len() {
            return Err(MeasureError::InvalidInput("spline x and y differ in length".into()));
        }
        if k == 0 || n <= k {
            return Err(MeasureError::InvalidInput(format!(
                "degree-{k} spline needs more than {k} points, got {n}"
            )));
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(MeasureError::InvalidInput(
                "spline abscissae must be strictly increasing".into(),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(MeasureError::InvalidInput("spline ordinates must be finite".into()));
        }

        let mut knots = Vec::with_capacity(n + k + 1);
        knots.extend(std::iter::repeat(x[0]).take(k + 1));
        if k % 2 == 1 {
            let h = (k + 1) / 2;
            knots.extend_from_slice(&x[h..n - h]);
        } else {
            let h = k / 2;
            for j in h..(n - h - 1) {
                knots.push(0.5 * (x[j] + x[j + 1]));
            }
        }
        knots.extend(std::iter::repeat(x[n - 1]).take(k + 1));

        let mut spline = Self {
            knots,
            coefs: vec![0.0; n],
            degree: k,
        };

        // Bandwidths from the actual sparsity pattern.
        let spans: Vec<usize> = x.iter().map(|&xi| spline.find_span(xi)).collect();
        let mut lower = 0usize;
        let mut upper = 0usize;
        for (i, &mu) in spans.iter().enumerate() {
            let first = mu - k;
            lower = lower.max(i.saturating_sub(first));
            upper = upper.max(mu.saturating_sub(i));
        }

        let mut a = BandedMatrix::zeros(n, lower, upper);
        for (i, (&xi, &mu)) in x.iter().zip(&spans).enumerate() {
            let basis = spline.basis_functions(mu, xi);
            for (r, &b) in basis.iter().enumerate() {
                if b != 0.0 {
                    a.add(i, mu - k + r, b)?;
                }
            }
        }
        spline.coefs = a.solve(y)?;
        Ok(spline)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Data range covered by the spline.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.coefs.len()])
    }

    fn find_span(&self, x: f64) -> usize {
        let k = self.degree;
        let last = self.coefs.len() - 1;
        let idx = self.knots.partition_point(|&t| t <= x);
        idx.saturating_sub(1).clamp(k, last)
    }

    /// Non-zero basis functions `N_{mu-k..=mu}` at `x` (Cox–de Boor).
    fn basis_functions(&self, mu: usize, x: f64) -> Vec<f64> {
        let k = self.degree;
        let t = &self.knots;
        let mut n = vec![0.0; k + 1];
        let mut left = vec![0.0; k + 1];
        let mut right = vec![0.0; k + 1];
        n[0] = 1.0;
        for j in 1..=k {
            left[j] = x - t[mu + 1 - j];
            right[j] = t[mu + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom != 0.0 { n[r] / denom } else { 0.0 };
                n[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }
        n
    }

    pub fn eval(&self, x: f64) -> f64 {
        let mu = self.find_span(x);
        let k = self.degree;
        self.basis_functions(mu, x)
            .iter()
            .enumerate()
            .map(|(r, b)| b * self.coefs[mu - k + r])
            .sum()
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }

    /// First derivative as a spline of one degree less.
    pub fn derivative(&self) -> Result<Self, MeasureError> {
        let k = self.degree;
        if k == 0 {
            return Err(MeasureError::InvalidInput(
                "cannot differentiate a degree-0 spline".into(),
            ));
        }
        let t = &self.knots;
        let coefs = (0..self.coefs.len() - 1)
            .map(|i| {
                let dt = t[i + k + 1] - t[i + 1];
                if dt > 0.0 {
                    k as f64 * (self.coefs[i + 1] - self.coefs[i]) / dt
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Self {
            knots: t[1..t.len() - 1].to_vec(),
            coefs,
            degree: k - 1,
        })
    }

    /// `n`-th derivative.
    pub fn nth_derivative(&self, n: usize) -> Result<Self, MeasureError> {
        let mut out = self.clone();
        for _ in 0..n {
            out = out.derivative()?;
        }
        Ok(out)
    }

    /// Zeros of the spline inside its domain, in increasing order.
    ///
    /// Each knot span is bracketed on a fixed sub-grid and refined by bisection,
    /// so two roots closer than a sub-grid step may be reported as none.
    pub fn roots(&self) -> Vec<f64> {
        let k = self.degree;
        let mut roots: Vec<f64> = Vec::new();
        let push = |r: f64, roots: &mut Vec<f64>| {
            if let Some(&last) = roots.last() {
                if (r - last).abs() <= 1e-12 * (1.0 + r.abs()) {
                    return;
                }
            }
            roots.push(r);
        };

        for mu in k..self.coefs.len() {
            let (a, b) = (self.knots[mu], self.knots[mu + 1]);
            if !(b > a) {
                continue;
            }
            let step = (b - a) / ROOT_SUBDIVISIONS as f64;
            let mut u0 = a;
            let mut f0 = self.eval(u0);
            for s in 1..=ROOT_SUBDIVISIONS {
                let u1 = if s == ROOT_SUBDIVISIONS { b } else { a + step * s as f64 };
                let f1 = self.eval(u1);
                if f0 == 0.0 {
                    push(u0, &mut roots);
                } else if f0 * f1 < 0.0 {
                    push(self.bisect(u0, u1, f0), &mut roots);
                }
                u0 = u1;
                f0 = f1;
            }
        }

        let (_, end) = self.domain();
        if self.eval(end) == 0.0 {
            push(end, &mut roots);
        }
        roots
    }

    fn bisect(&self, mut lo: f64, mut hi: f64, mut f_lo: f64) -> f64 {
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            let f_mid = self.eval(mid);
            if f_mid == 0.0 {
                return mid;
            }
            if f_lo * f_mid < 0.0 {
                hi = mid;
            } else {
                lo = mid;
                f_lo = f_mid;
            }
        }
        0.5 * (lo + hi)
    }
}
