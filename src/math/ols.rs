//! Weighted least squares and polynomial fits.
//!
//! Small linear problems show up all over the engine: quadratic continua for
//! the low-pass smoother, straight local continua for pEW, flank fits for the
//! shallow pEW. All of them reduce to
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! [`polyfit`] scales rows by `sqrt(w_i)`, centres and rescales the abscissae
//! to `[-1, 1]`, and solves the tall system with SVD.

use nalgebra::{DMatrix, DVector};

use crate::error::MeasureError;

/// A polynomial stored with the highest power first (`c[0] x^n + ... + c[n]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    /// Straight line through two points.
    pub fn through(p0: (f64, f64), p1: (f64, f64)) -> Result<Self, MeasureError> {
        let dx = p1.0 - p0.0;
        if !(dx.is_finite() && dx != 0.0) {
            return Err(MeasureError::InvalidInput(format!(
                "cannot draw a line through x={} and x={}",
                p0.0, p1.0
            )));
        }
        let slope = (p1.1 - p0.1) / dx;
        Ok(Self::new(vec![slope, p0.1 - slope * p0.0]))
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Horner evaluation.
    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }
}

/// Weighted polynomial fit of degree `deg` (highest power first).
///
/// `x` is centred and scaled internally before building the Vandermonde matrix,
/// so wavelengths in the thousands do not wreck the conditioning.
pub fn polyfit(x: &[f64], y: &[f64], w: Option<&[f64]>, deg: usize) -> Result<Polynomial, MeasureError> {
    let n = x.len();
    if n != y.len() || w.is_some_and(|w| w.len() != n) {
        return Err(MeasureError::InvalidInput("polyfit arrays differ in length".into()));
    }
    if n <= deg {
        return Err(MeasureError::InvalidInput(format!(
            "polyfit of degree {deg} needs more than {deg} points, got {n}"
        )));
    }

    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let shift = 0.5 * (lo + hi);
    let scale = if hi > lo { 0.5 * (hi - lo) } else { 1.0 };

    let p = deg + 1;
    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = w.map(|w| w[i]).unwrap_or(1.0).max(0.0).sqrt();
        let u = (x[i] - shift) / scale;
        let mut pow = 1.0;
        for j in 0..p {
            xw[(i, j)] = pow * sw;
            pow *= u;
        }
        yw[i] = y[i] * sw;
    }

    let beta = xw
        .svd(true, true)
        .solve(&yw, 1e-12)
        .ok()
        .filter(|b| b.iter().all(|v| v.is_finite()))
        .ok_or_else(|| MeasureError::Numerical("polynomial fit is singular".into()))?;

    // beta holds ascending coefficients in u = (x - shift) / scale; expand back to x.
    let mut ascending = vec![0.0; p];
    for (j, &b) in beta.iter().enumerate() {
        // (x - shift)^j / scale^j expanded with binomial coefficients.
        let factor = b / scale.powi(j as i32);
        let mut binom = 1.0;
        for k in 0..=j {
            ascending[k] += factor * binom * (-shift).powi((j - k) as i32);
            binom = binom * (j - k) as f64 / (k + 1) as f64;
        }
    }
    ascending.reverse();
    Ok(Polynomial::new(ascending))
}
