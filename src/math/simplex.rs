//! Nelder–Mead downhill simplex on top of `argmin`.
//!
//! Derivative-free minimiser used wherever the objective is cheap but has no
//! Jacobian (power-spectrum model fits, coverage calibration, the fit helper
//! when the model supplies no Jacobian).
//!
//! Conventions:
//! - initial simplex perturbs each coordinate by 5% (or 0.00025 when zero)
//! - converged once the standard deviation of the vertex costs drops below
//!   `sd_tolerance`
//! - iterations are capped at `1000 * (1 + n)`

use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;

use crate::error::MeasureError;

/// Outcome of a Nelder–Mead run.
#[derive(Debug, Clone)]
pub struct SimplexResult {
    pub x: Vec<f64>,
    pub fun: f64,
    pub iterations: u64,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SimplexOptions {
    pub sd_tolerance: f64,
    pub max_iter: Option<u64>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            sd_tolerance: 1e-10,
            max_iter: None,
        }
    }
}

/// Cost function for argmin; non-finite values become `f64::MAX` so the
/// simplex moves away from them.
struct Objective<F> {
    f: F,
}

impl<F> CostFunction for Objective<F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let v = (self.f)(x);
        Ok(if v.is_finite() { v } else { f64::MAX })
    }
}

fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for i in 0..x0.len() {
        let mut vertex = x0.to_vec();
        vertex[i] = if vertex[i] != 0.0 { 1.05 * vertex[i] } else { 0.00025 };
        simplex.push(vertex);
    }
    simplex
}

/// Minimise `f` starting from `x0`.
pub fn nelder_mead<F>(f: F, x0: &[f64], opts: SimplexOptions) -> Result<SimplexResult, MeasureError>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    if n == 0 {
        let fun = f(x0);
        return Ok(SimplexResult {
            x: Vec::new(),
            fun,
            iterations: 0,
            converged: fun.is_finite(),
        });
    }
    let max_iter = opts.max_iter.unwrap_or(1000 * (1 + n as u64));

    let solver = NelderMead::new(initial_simplex(x0))
        .with_sd_tolerance(opts.sd_tolerance)
        .map_err(|e| MeasureError::Numerical(format!("simplex setup: {e}")))?;
    let result = Executor::new(Objective { f }, solver)
        .configure(|state| state.max_iters(max_iter))
        .run()
        .map_err(|e| MeasureError::Numerical(format!("simplex run: {e}")))?;

    let state = result.state();
    let x = state.best_param.clone().unwrap_or_else(|| x0.to_vec());
    let fun = state.best_cost;
    let converged =
        state.get_termination_reason() == Some(&TerminationReason::SolverConverged) && fun < f64::MAX;
    Ok(SimplexResult {
        x,
        fun,
        iterations: state.get_iter(),
        converged,
    })
}
