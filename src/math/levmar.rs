//! Levenberg–Marquardt for weighted nonlinear least squares.
//!
//! The caller supplies already-weighted residuals `(model(x_i; a) - y_i) / σ_i`
//! together with their Jacobian; the iteration itself is the MINPACK port in
//! the `levenberg-marquardt` crate.
//!
//! After convergence the parameter covariance is `(JᵀJ)^-1`, which is the
//! absolute covariance because the residuals already carry their 1-sigma
//! weights.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

/// Evaluation budget is `PATIENCE * (1 + n)`.
const PATIENCE: usize = 1000;

#[derive(Debug, Clone)]
pub struct LmResult {
    pub x: Vec<f64>,
    /// Sum of squared weighted residuals at `x`.
    pub cost: f64,
    /// Absolute parameter covariance, when `JᵀJ` is invertible.
    pub covariance: Option<DMatrix<f64>>,
    pub evaluations: usize,
    pub converged: bool,
}

impl LmResult {
    pub fn stddevs(&self) -> Option<Vec<f64>> {
        let cov = self.covariance.as_ref()?;
        let sd: Vec<f64> = (0..cov.nrows()).map(|i| cov[(i, i)].sqrt()).collect();
        sd.iter().all(|v| v.is_finite()).then_some(sd)
    }
}

struct Problem<R, J> {
    x: DVector<f64>,
    residuals: R,
    jacobian: J,
}

impl<R, J> LeastSquaresProblem<f64, Dyn, Dyn> for Problem<R, J>
where
    R: Fn(&[f64]) -> Option<Vec<f64>>,
    J: Fn(&[f64]) -> Option<DMatrix<f64>>,
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = (self.residuals)(self.x.as_slice())?;
        r.iter().all(|v| v.is_finite()).then(|| DVector::from_vec(r))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jac = (self.jacobian)(self.x.as_slice())?;
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}

/// Minimise `Σ r_i(x)^2` from `x0`.
///
/// `residuals` and `jacobian` return `None` when the model cannot be evaluated
/// at `x`; the Jacobian has one row per residual and one column per parameter.
pub fn levenberg_marquardt<R, J>(residuals: R, jacobian: J, x0: &[f64]) -> LmResult
where
    R: Fn(&[f64]) -> Option<Vec<f64>>,
    J: Fn(&[f64]) -> Option<DMatrix<f64>>,
{
    let problem = Problem {
        x: DVector::from_column_slice(x0),
        residuals,
        jacobian,
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(PATIENCE)
        .minimize(problem);

    let x = problem.x.as_slice().to_vec();
    let r = problem.residuals();
    if !report.termination.was_successful() || r.is_none() {
        log::debug!("levenberg-marquardt stopped: {:?}", report.termination);
        return LmResult {
            x,
            cost: f64::NAN,
            covariance: None,
            evaluations: report.number_of_evaluations,
            converged: false,
        };
    }

    let covariance = problem
        .jacobian()
        .and_then(|jac| (jac.transpose() * &jac).try_inverse());
    LmResult {
        x,
        cost: r.map_or(f64::NAN, |r| r.norm_squared()),
        covariance,
        evaluations: report.number_of_evaluations,
        converged: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..30).map(|i| i as f64 * 0.2).collect();
        let y: Vec<f64> = t.iter().map(|&v| 3.0 * (-0.7 * v).exp() + 0.5).collect();
        let res = levenberg_marquardt(
            |a: &[f64]| {
                Some(
                    t.iter()
                        .zip(&y)
                        .map(|(&ti, &yi)| a[0] * (-a[1] * ti).exp() + a[2] - yi)
                        .collect(),
                )
            },
            |a: &[f64]| {
                Some(DMatrix::from_fn(t.len(), 3, |i, j| {
                    let e = (-a[1] * t[i]).exp();
                    match j {
                        0 => e,
                        1 => -a[0] * t[i] * e,
                        _ => 1.0,
                    }
                }))
            },
            &[1.0, 0.3, 0.0],
        );
        assert!(res.converged);
        assert!((res.x[0] - 3.0).abs() < 1e-6);
        assert!((res.x[1] - 0.7).abs() < 1e-6);
        assert!((res.x[2] - 0.5).abs() < 1e-6);
        assert!(res.cost < 1e-12);
    }

    #[test]
    fn reports_failure_when_model_cannot_be_evaluated() {
        let res = levenberg_marquardt(|_: &[f64]| None, |_: &[f64]| None, &[1.0]);
        assert!(!res.converged);
        assert!(res.stddevs().is_none());
    }
}
