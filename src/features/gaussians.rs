//! Line centres from Gaussian profile fits.
//!
//! Each interval is fit on its own: a straight continuum plus every Gaussian
//! component, weighted by the flux error. The reported value of a slot is the
//! fitted centre `x0`, its uncertainty comes from the fit covariance, and the
//! interval quality is the reduced chi-square.
//!
//! In perturbed-continuum mode the continuum end points are redrawn from a
//! normal distribution (`sigma = |value| * continuum_error`) and the
//! amplitudes shifted so the profile keeps its depth at each centre; the fit
//! then uses unit weights.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::domain::{IntervalLayout, IntervalResult, Limits, Measurement, SlotResult};
use crate::error::MeasureError;
use crate::features::{Feature, Locations, check_interval_count, warn_interval};
use crate::fit::{GroupJacobian, ParamGroups, curve_fit};
use crate::math::Polynomial;
use crate::models::{continuum_gradient, lines_from, profile_many};
use crate::spectrum::Spectrum;
use crate::tools::{ContinuumMode, Dependency, Tool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussiansParams {
    /// Per interval, `[slope, intercept]` of the continuum line.
    pub continuum: Vec<[f64; 2]>,
    pub amplitudes: Vec<Vec<f64>>,
    pub x0s: Vec<Vec<f64>>,
    pub stddevs: Vec<Vec<f64>>,
    pub limits: Vec<Limits>,
    /// Rest wavelength per component, for velocities.
    pub references: Vec<Vec<Option<f64>>>,
}

impl GaussiansParams {
    fn validate(&self) -> Result<(), MeasureError> {
        let n = self.limits.len();
        let name = Gaussians::NAME;
        check_interval_count(name, n, "continuum", self.continuum.len())?;
        check_interval_count(name, n, "amplitudes", self.amplitudes.len())?;
        check_interval_count(name, n, "x0s", self.x0s.len())?;
        check_interval_count(name, n, "stddevs", self.stddevs.len())?;
        check_interval_count(name, n, "references", self.references.len())?;
        for i in 0..n {
            let m = self.x0s[i].len();
            if self.amplitudes[i].len() != m || self.stddevs[i].len() != m || self.references[i].len() != m {
                return Err(MeasureError::InvalidInput(format!(
                    "{name}: interval {i} lists differing numbers of components"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gaussians {
    params: Option<GaussiansParams>,
    fix_continuum: bool,
}

/// Fitted groups of one interval.
struct IntervalFit {
    result: IntervalResult,
    continuum: [f64; 2],
    amplitudes: Vec<f64>,
    x0s: Vec<f64>,
    stddevs: Vec<f64>,
}

fn gaussian_model(x: &[f64], p: &ParamGroups) -> Option<Vec<f64>> {
    let lines = lines_from(p.get("amplitudes")?, p.get("x0s")?, p.get("stddevs")?).ok()?;
    Some(profile_many(x, p.get("continuum")?, &lines))
}

fn gaussian_jacobian(x: &[f64], p: &ParamGroups) -> Option<GroupJacobian> {
    let continuum = p.get("continuum")?;
    let lines = lines_from(p.get("amplitudes")?, p.get("x0s")?, p.get("stddevs")?).ok()?;
    let degree = continuum.len().checked_sub(1)?;

    let mut base = vec![vec![0.0; x.len()]; continuum.len()];
    let mut by_line = vec![[vec![0.0; x.len()], vec![0.0; x.len()], vec![0.0; x.len()]]; lines.len()];
    for (i, &xi) in x.iter().enumerate() {
        for (column, d) in base.iter_mut().zip(continuum_gradient(xi, degree)) {
            column[i] = d;
        }
        for (columns, line) in by_line.iter_mut().zip(&lines) {
            for (column, d) in columns.iter_mut().zip(line.gradient(xi)) {
                column[i] = d;
            }
        }
    }

    let mut jac = GroupJacobian::new();
    jac.insert("continuum".into(), base);
    for (k, name) in ["amplitudes", "x0s", "stddevs"].into_iter().enumerate() {
        jac.insert(name.into(), by_line.iter().map(|c| c[k].clone()).collect());
    }
    Some(jac)
}

/// Fitted value, or the starting value when the group came back short.
fn or_initial(fitted: Vec<Option<f64>>, initial: &[f64]) -> Vec<f64> {
    initial
        .iter()
        .enumerate()
        .map(|(k, v)| fitted.get(k).copied().flatten().unwrap_or(*v))
        .collect()
}

impl Gaussians {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the continuum at its initial value during fits.
    pub fn set_fix_continuum(&mut self, state: bool) {
        self.fix_continuum = state;
    }

    pub fn fix_continuum(&self) -> bool {
        self.fix_continuum
    }

    fn fit_interval(
        &self,
        spectrum: &Spectrum,
        params: &GaussiansParams,
        i: usize,
        rng: Option<&mut StdRng>,
    ) -> Result<IntervalFit, MeasureError> {
        let limits = params.limits[i];
        let sub = spectrum.slice(Some(limits.lower), Some(limits.upper));
        let unknowns = 2 + 3 * params.x0s[i].len();
        if sub.len() < unknowns {
            return Err(MeasureError::InvalidInput(format!(
                "{} samples cannot constrain {unknowns} parameters",
                sub.len()
            )));
        }
        let mut continuum = params.continuum[i];
        let mut amplitudes = params.amplitudes[i].clone();
        let x0s = &params.x0s[i];

        let sigma = match rng {
            Some(rng) => {
                let line = Polynomial::new(continuum.to_vec());
                let scale = spectrum.continuum_error();
                let mut draw = |w: f64| {
                    let loc = line.eval(w);
                    let z: f64 = rng.sample(StandardNormal);
                    loc + loc.abs() * scale * z
                };
                let p0 = (limits.lower, draw(limits.lower));
                let p1 = (limits.upper, draw(limits.upper));
                let moved = Polynomial::through(p0, p1)?;
                for (a, &x0) in amplitudes.iter_mut().zip(x0s) {
                    *a += line.eval(x0) - moved.eval(x0);
                }
                let c = moved.coefficients();
                continuum = [c[0], c[1]];
                vec![1.0; sub.len()]
            }
            None => sub.error()?.to_vec(),
        };

        let mut initial = ParamGroups::new();
        initial.insert("continuum".into(), continuum.to_vec());
        initial.insert("amplitudes".into(), amplitudes.clone());
        initial.insert("x0s".into(), x0s.clone());
        initial.insert("stddevs".into(), params.stddevs[i].clone());

        let fixed: &[&str] = if self.fix_continuum { &["continuum"] } else { &[] };
        let fit = curve_fit(
            gaussian_model,
            Some(&gaussian_jacobian),
            &sub.wave,
            &sub.flux,
            &sigma,
            &initial,
            fixed,
        )?;
        if !fit.converged {
            return Err(MeasureError::Numerical("gaussian fit did not converge".into()));
        }

        let centres = fit.value("x0s");
        let centre_errors = fit.stddev("x0s");
        let slots = params.references[i]
            .iter()
            .enumerate()
            .map(|(j, r)| SlotResult {
                value: centres.get(j).copied().flatten(),
                stddev: centre_errors.get(j).copied().flatten(),
                reference: *r,
            })
            .collect();
        let fitted_continuum = or_initial(fit.value("continuum"), &continuum);
        log::debug!(
            "{}: [{:.2}, {:.2}] centres={:?} chi2={:?}",
            Self::NAME,
            limits.lower,
            limits.upper,
            centres,
            fit.quality
        );

        Ok(IntervalFit {
            result: IntervalResult { limits, slots, quality: fit.quality },
            continuum: [fitted_continuum[0], fitted_continuum[1]],
            amplitudes: or_initial(fit.value("amplitudes"), &amplitudes),
            x0s: or_initial(centres, x0s),
            stddevs: or_initial(fit.value("stddevs"), &params.stddevs[i]),
        })
    }
}

impl Tool for Gaussians {
    const NAME: &'static str = "velocity.gaussians";
    const PARAMETERS: &'static [&'static str] =
        &["continuum", "amplitudes", "x0s", "stddevs", "limits", "references"];
    const DEPENDENCIES: &'static [Dependency] = &[Dependency::SpectrumError];

    type Params = GaussiansParams;

    fn parameters(&self) -> Option<&GaussiansParams> {
        self.params.as_ref()
    }

    fn store_parameters(&mut self, params: Option<GaussiansParams>) {
        self.params = params;
    }
}

impl Feature for Gaussians {
    const REPORTS_STDDEV: bool = true;

    fn layout(params: &GaussiansParams) -> Vec<IntervalLayout> {
        params
            .limits
            .iter()
            .zip(&params.references)
            .map(|(l, r)| IntervalLayout { limits: *l, references: r.clone() })
            .collect()
    }

    fn measure(
        &mut self,
        spectrum: &Spectrum,
        params: GaussiansParams,
        mode: ContinuumMode,
    ) -> Result<Measurement, MeasureError> {
        Self::check_dependencies(spectrum)?;
        params.validate()?;

        let mut rng = mode.rng();
        let mut fitted = params.clone();
        let mut intervals = Vec::with_capacity(params.limits.len());
        for i in 0..params.limits.len() {
            match self.fit_interval(spectrum, &params, i, rng.as_mut()) {
                Ok(fit) => {
                    fitted.continuum[i] = fit.continuum;
                    fitted.amplitudes[i] = fit.amplitudes;
                    fitted.x0s[i] = fit.x0s;
                    fitted.stddevs[i] = fit.stddevs;
                    intervals.push(fit.result);
                }
                Err(err) => {
                    warn_interval(Self::NAME, params.limits[i], &err);
                    intervals.push(IntervalResult::failed(params.limits[i], &params.references[i]));
                }
            }
        }

        self.set_parameters(fitted);
        Ok(Measurement { feature: Self::NAME.to_string(), intervals })
    }

    /// Centres at the observed flux of the nearest sample.
    fn locations(&self, spectrum: &Spectrum) -> Result<Locations, MeasureError> {
        let params = self
            .parameters()
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        Ok(params
            .x0s
            .iter()
            .map(|xs| {
                xs.iter()
                    .map(|&x| spectrum.nearest(x).map(|(_, flux)| (x, flux)))
                    .collect()
            })
            .collect())
    }
}
