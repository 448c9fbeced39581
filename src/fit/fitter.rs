//! Generic nonlinear fit helper.
//!
//! Models take their parameters as named groups of one or more scalars
//! (`continuum`, `amplitudes`, ...). For the optimisers we:
//! - ravel the free groups into one flat vector, in key order
//! - unravel trial vectors back into groups before calling the model
//! - re-insert the held-fixed groups untouched
//!
//! [`curve_fit`] picks the strategy from what the model provides:
//! - with a Jacobian: error-weighted Levenberg–Marquardt with absolute
//!   covariance
//! - without one: [`minimize`], the sum of squared residuals by Nelder–Mead,
//!   which yields no uncertainties
//!
//! A fit that does not converge is not an error: every free parameter, its
//! uncertainty and the fit quality come back as `None`.

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::error::MeasureError;
use crate::math::{SimplexOptions, levenberg_marquardt, nelder_mead};

/// Named parameter groups.
pub type ParamGroups = BTreeMap<String, Vec<f64>>;

/// Model derivatives per group: one column over `x` for every scalar of the
/// group, in group order.
pub type GroupJacobian = BTreeMap<String, Vec<Vec<f64>>>;

/// Analytic Jacobian of a model, evaluated at `x` for the given groups.
pub type ModelJacobian<'a> = dyn Fn(&[f64], &ParamGroups) -> Option<GroupJacobian> + 'a;

/// Group names and lengths, in ravel order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure(Vec<(String, usize)>);

impl Structure {
    pub fn len(&self) -> usize {
        self.0.iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flatten groups in key order.
pub fn ravel(groups: &ParamGroups) -> (Vec<f64>, Structure) {
    let mut flat = Vec::new();
    let mut structure = Vec::with_capacity(groups.len());
    for (name, values) in groups {
        structure.push((name.clone(), values.len()));
        flat.extend_from_slice(values);
    }
    (flat, Structure(structure))
}

/// Inverse of [`ravel`]; generic so it also rebuilds optional values.
pub fn unravel<T: Clone>(flat: &[T], structure: &Structure) -> BTreeMap<String, Vec<T>> {
    let mut out = BTreeMap::new();
    let mut i = 0;
    for (name, n) in &structure.0 {
        let end = (i + n).min(flat.len());
        out.insert(name.clone(), flat[i.min(end)..end].to_vec());
        i += n;
    }
    out
}

/// Result of a fit; values and uncertainties per group.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub values: BTreeMap<String, Vec<Option<f64>>>,
    pub stddevs: BTreeMap<String, Vec<Option<f64>>>,
    /// Reduced chi-square for [`curve_fit`], plain sum of squares for [`minimize`].
    pub quality: Option<f64>,
    pub converged: bool,
}

impl FitOutcome {
    pub fn value(&self, group: &str) -> Vec<Option<f64>> {
        self.values.get(group).cloned().unwrap_or_default()
    }

    pub fn stddev(&self, group: &str) -> Vec<Option<f64>> {
        self.stddevs.get(group).cloned().unwrap_or_default()
    }
}

/// Split `initial` into free and fixed groups.
fn partition(initial: &ParamGroups, fixed: &[&str]) -> Result<(ParamGroups, ParamGroups), MeasureError> {
    for name in fixed {
        if !initial.contains_key(*name) {
            return Err(MeasureError::MissingParameter((*name).to_string()));
        }
    }
    let (held, free): (ParamGroups, ParamGroups) = initial
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .partition(|(k, _)| fixed.contains(&k.as_str()));
    Ok((free, held))
}

fn merged(free: BTreeMap<String, Vec<f64>>, held: &ParamGroups) -> ParamGroups {
    let mut all = free;
    all.extend(held.iter().map(|(k, v)| (k.clone(), v.clone())));
    all
}

fn outcome(
    free_values: Option<&[f64]>,
    free_stddevs: Option<Vec<f64>>,
    structure: &Structure,
    held: &ParamGroups,
    quality: Option<f64>,
) -> FitOutcome {
    let n = structure.len();
    let values: Vec<Option<f64>> = match free_values {
        Some(v) => v.iter().map(|x| Some(*x)).collect(),
        None => vec![None; n],
    };
    let stddevs: Vec<Option<f64>> = match free_stddevs {
        Some(s) => s.into_iter().map(Some).collect(),
        None => vec![None; n],
    };
    let mut values = unravel(&values, structure);
    let mut stddevs = unravel(&stddevs, structure);
    for (name, v) in held {
        values.insert(name.clone(), v.iter().map(|x| Some(*x)).collect());
        stddevs.insert(name.clone(), vec![None; v.len()]);
    }
    FitOutcome {
        converged: free_values.is_some(),
        values,
        stddevs,
        quality,
    }
}

/// Columns of the free groups, in ravel order, divided by `sigma`.
fn weighted_jacobian(
    columns: &GroupJacobian,
    structure: &Structure,
    sigma: &[f64],
) -> Option<DMatrix<f64>> {
    let mut jac = DMatrix::zeros(sigma.len(), structure.len());
    let mut j = 0;
    for (name, n) in &structure.0 {
        let group = columns.get(name)?;
        if group.len() != *n {
            return None;
        }
        for column in group {
            if column.len() != sigma.len() {
                return None;
            }
            for (i, (d, s)) in column.iter().zip(sigma).enumerate() {
                jac[(i, j)] = d / s;
            }
            j += 1;
        }
    }
    Some(jac)
}

/// Weighted least-squares fit of `model` to `(x, y)` with 1-sigma errors `sigma`.
///
/// Groups named in `fixed` are held at their initial values. With a
/// `jacobian` the fit is Levenberg–Marquardt and the quality is the reduced
/// chi-square, dividing by `len(x) - free parameters` (`None` when that is
/// not positive). Without one the fit falls back to [`minimize`].
pub fn curve_fit<F>(
    model: F,
    jacobian: Option<&ModelJacobian<'_>>,
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    initial: &ParamGroups,
    fixed: &[&str],
) -> Result<FitOutcome, MeasureError>
where
    F: Fn(&[f64], &ParamGroups) -> Option<Vec<f64>>,
{
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(MeasureError::InvalidInput("fit arrays differ in length".into()));
    }
    if sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(MeasureError::InvalidInput(
            "fit errors must be finite and positive".into(),
        ));
    }
    let Some(jacobian) = jacobian else {
        log::debug!("no model jacobian, fitting by simplex");
        return minimize(model, x, y, initial, fixed);
    };
    let (free, held) = partition(initial, fixed)?;
    let (a0, structure) = ravel(&free);

    let residuals = |a: &[f64]| -> Option<Vec<f64>> {
        let params = merged(unravel(a, &structure), &held);
        let f = model(x, &params)?;
        if f.len() != y.len() {
            return None;
        }
        Some(
            f.iter()
                .zip(y)
                .zip(sigma)
                .map(|((fi, yi), si)| (fi - yi) / si)
                .collect(),
        )
    };
    let derivatives = |a: &[f64]| -> Option<DMatrix<f64>> {
        let params = merged(unravel(a, &structure), &held);
        weighted_jacobian(&jacobian(x, &params)?, &structure, sigma)
    };

    let res = levenberg_marquardt(residuals, derivatives, &a0);
    if !res.converged {
        log::debug!("curve fit did not converge after {} evaluations", res.evaluations);
        return Ok(outcome(None, None, &structure, &held, None));
    }

    let dof = x.len() as f64 - a0.len() as f64;
    let chi2 = (dof > 0.0).then(|| res.cost / dof);
    Ok(outcome(Some(&res.x), res.stddevs(), &structure, &held, chi2))
}

/// Unweighted least squares by Nelder–Mead; no uncertainties are produced.
///
/// Groups named in `fixed` are held at their initial values.
pub fn minimize<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    initial: &ParamGroups,
    fixed: &[&str],
) -> Result<FitOutcome, MeasureError>
where
    F: Fn(&[f64], &ParamGroups) -> Option<Vec<f64>>,
{
    if x.len() != y.len() {
        return Err(MeasureError::InvalidInput("fit arrays differ in length".into()));
    }
    let (free, held) = partition(initial, fixed)?;
    let (a0, structure) = ravel(&free);
    let sum_sq = |a: &[f64]| -> f64 {
        match model(x, &merged(unravel(a, &structure), &held)) {
            Some(f) if f.len() == y.len() => f.iter().zip(y).map(|(fi, yi)| (fi - yi).powi(2)).sum(),
            _ => f64::INFINITY,
        }
    };
    let res = nelder_mead(sum_sq, &a0, SimplexOptions::default())?;
    if !res.converged {
        log::debug!("simplex fit did not converge after {} iterations", res.iterations);
        return Ok(outcome(None, None, &structure, &held, None));
    }
    Ok(outcome(Some(&res.x), None, &structure, &held, Some(res.fun)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: &[f64], p: &ParamGroups) -> Option<Vec<f64>> {
        let c = p.get("line")?;
        Some(x.iter().map(|v| c[0] * v + c[1]).collect())
    }

    fn line_jacobian(x: &[f64], _: &ParamGroups) -> Option<GroupJacobian> {
        Some(GroupJacobian::from([("line".to_string(), vec![x.to_vec(), vec![1.0; x.len()]])]))
    }

    fn groups(pairs: &[(&str, &[f64])]) -> ParamGroups {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn ravel_round_trip_sorts_by_name() {
        let g = groups(&[("b", &[3.0]), ("a", &[1.0, 2.0])]);
        let (flat, structure) = ravel(&g);
        assert_eq!(flat, vec![1.0, 2.0, 3.0]);
        assert_eq!(unravel(&flat, &structure), g);
    }

    #[test]
    fn weighted_line_fit_reports_errors() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v - 1.0).collect();
        let sigma = vec![0.1; 20];
        let initial = groups(&[("line", &[1.0, 0.0])]);
        let fit = curve_fit(line, Some(&line_jacobian), &x, &y, &sigma, &initial, &[]).unwrap();
        let v = fit.value("line");
        assert!((v[0].unwrap() - 2.0).abs() < 1e-6);
        assert!((v[1].unwrap() + 1.0).abs() < 1e-5);
        assert!(fit.quality.unwrap() < 1e-8);

        // Analytic slope error for equal weights: sigma / sqrt(Σ (x - x̄)^2).
        let sxx: f64 = x.iter().map(|v| (v - 9.5).powi(2)).sum();
        let expected = 0.1 / sxx.sqrt();
        assert!((fit.stddev("line")[0].unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn fixed_groups_are_held() {
        let model = |x: &[f64], p: &ParamGroups| -> Option<Vec<f64>> {
            let slope = p.get("slope")?[0];
            let offset = p.get("offset")?[0];
            Some(x.iter().map(|v| slope * v + offset).collect())
        };
        let jacobian = |x: &[f64], _: &ParamGroups| -> Option<GroupJacobian> {
            Some(GroupJacobian::from([
                ("slope".to_string(), vec![x.to_vec()]),
                ("offset".to_string(), vec![vec![1.0; x.len()]]),
            ]))
        };
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 5.0).collect();
        let initial = groups(&[("slope", &[1.0]), ("offset", &[5.0])]);
        let fit = curve_fit(model, Some(&jacobian), &x, &y, &vec![1.0; 10], &initial, &["offset"]).unwrap();
        assert_eq!(fit.value("offset"), vec![Some(5.0)]);
        assert_eq!(fit.stddev("offset"), vec![None]);
        assert!((fit.value("slope")[0].unwrap() - 3.0).abs() < 1e-6);
        assert!(fit.stddev("slope")[0].is_some());
    }

    #[test]
    fn failed_fit_reports_unavailable() {
        let broken = |_: &[f64], _: &ParamGroups| -> Option<Vec<f64>> { None };
        let initial = groups(&[("a", &[1.0])]);
        let no_derivatives = |_: &[f64], _: &ParamGroups| -> Option<GroupJacobian> { None };
        for jacobian in [Some(&no_derivatives as &ModelJacobian<'_>), None] {
            let fit = curve_fit(broken, jacobian, &[1.0, 2.0], &[1.0, 2.0], &[1.0, 1.0], &initial, &[]).unwrap();
            assert!(!fit.converged);
            assert_eq!(fit.value("a"), vec![None]);
            assert_eq!(fit.quality, None);
        }
    }

    #[test]
    fn missing_jacobian_falls_back_to_simplex() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v + 2.0).collect();
        let initial = groups(&[("line", &[1.0, 1.0])]);
        let fit = curve_fit(line, None, &x, &y, &vec![0.1; 10], &initial, &[]).unwrap();
        assert!(fit.converged);
        let v = fit.value("line");
        assert!((v[0].unwrap() - 0.5).abs() < 1e-2);
        assert!((v[1].unwrap() - 2.0).abs() < 5e-2);
        // Simplex fits carry no covariance.
        assert_eq!(fit.stddev("line"), vec![None, None]);
        assert!(fit.quality.unwrap() < 1e-3);
    }

    #[test]
    fn simplex_holds_fixed_groups() {
        let model = |x: &[f64], p: &ParamGroups| -> Option<Vec<f64>> {
            let slope = p.get("slope")?[0];
            let offset = p.get("offset")?[0];
            Some(x.iter().map(|v| slope * v + offset).collect())
        };
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| -2.0 * v + 1.0).collect();
        let initial = groups(&[("slope", &[1.0]), ("offset", &[1.0])]);
        let fit = minimize(model, &x, &y, &initial, &["offset"]).unwrap();
        assert_eq!(fit.value("offset"), vec![Some(1.0)]);
        assert!((fit.value("slope")[0].unwrap() + 2.0).abs() < 1e-3);
    }
}
