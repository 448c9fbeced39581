//! Banded linear systems.
//!
//! Spline collocation matrices and the penalized smoothing-spline system are
//! banded with a handful of diagonals, so a dense solve would waste O(n^3) work
//! on zeros. Both systems are safe to eliminate without pivoting: B-spline
//! collocation matrices are totally positive and the smoothing system is
//! symmetric positive definite.

use crate::error::MeasureError;

/// Square matrix stored by diagonals: entry `(i, j)` lives at
/// `data[i * width + (j + lower - i)]` for `i - lower <= j <= i + upper`.
#[derive(Debug, Clone)]
pub struct BandedMatrix {
    n: usize,
    lower: usize,
    upper: usize,
    data: Vec<f64>,
}

impl BandedMatrix {
    pub fn zeros(n: usize, lower: usize, upper: usize) -> Self {
        let width = lower + upper + 1;
        Self {
            n,
            lower,
            upper,
            data: vec![0.0; n * width],
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    fn width(&self) -> usize {
        self.lower + self.upper + 1
    }

    fn slot(&self, i: usize, j: usize) -> Option<usize> {
        if i >= self.n || j >= self.n || j + self.lower < i || j > i + self.upper {
            return None;
        }
        Some(i * self.width() + (j + self.lower - i))
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.slot(i, j).map(|k| self.data[k]).unwrap_or(0.0)
    }

    /// Add `v` to entry `(i, j)`. Entries outside the band are rejected.
    pub fn add(&mut self, i: usize, j: usize, v: f64) -> Result<(), MeasureError> {
        let k = self.slot(i, j).ok_or_else(|| {
            MeasureError::Numerical(format!("entry ({i}, {j}) outside matrix band"))
        })?;
        self.data[k] += v;
        Ok(())
    }

    /// Solve `A x = b` by Gaussian elimination without pivoting.
    ///
    /// Consumes the matrix (it is overwritten by its LU factors).
    pub fn solve(mut self, b: &[f64]) -> Result<Vec<f64>, MeasureError> {
        let n = self.n;
        if b.len() != n {
            return Err(MeasureError::Numerical(format!(
                "banded solve: rhs length {} != {n}",
                b.len()
            )));
        }
        let mut x = b.to_vec();

        for k in 0..n {
            let pivot = self.get(k, k);
            if !(pivot.is_finite() && pivot.abs() > f64::MIN_POSITIVE) {
                return Err(MeasureError::Numerical(format!(
                    "banded solve: zero pivot at row {k}"
                )));
            }
            let last_row = (k + self.lower).min(n - 1);
            let last_col = (k + self.upper).min(n - 1);
            for i in (k + 1)..=last_row {
                let factor = self.get(i, k) / pivot;
                if factor == 0.0 {
                    continue;
                }
                for j in k..=last_col {
                    let v = self.get(k, j);
                    if v != 0.0 {
                        self.add(i, j, -factor * v)?;
                    }
                }
                x[i] -= factor * x[k];
            }
        }

        for k in (0..n).rev() {
            let last_col = (k + self.upper).min(n - 1);
            let mut acc = x[k];
            for j in (k + 1)..=last_col {
                acc -= self.get(k, j) * x[j];
            }
            x[k] = acc / self.get(k, k);
        }

        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(MeasureError::Numerical("banded solve produced non-finite values".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_tridiagonal_system() {
        // [2 1 0; 1 2 1; 0 1 2] x = [4, 8, 8] -> x = [1, 2, 3]
        let mut a = BandedMatrix::zeros(3, 1, 1);
        for i in 0..3 {
            a.add(i, i, 2.0).unwrap();
        }
        for i in 0..2 {
            a.add(i, i + 1, 1.0).unwrap();
            a.add(i + 1, i, 1.0).unwrap();
        }
        let x = a.solve(&[4.0, 8.0, 8.0]).unwrap();
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_entries_outside_band() {
        let mut a = BandedMatrix::zeros(4, 1, 1);
        assert!(a.add(0, 3, 1.0).is_err());
        assert_eq!(a.get(0, 3), 0.0);
        assert_eq!(a.size(), 4);
    }
}
