//! Shared measurement workflow for front-ends that do not want to drive each
//! tool by hand.
//!
//! smooth -> estimate error -> measure -> propagate
//!
//! Every tool's parameters end up in the returned [`Header`], so a later run
//! can resume from this one's configuration.

use crate::config::EngineConfig;
use crate::domain::Measurement;
use crate::error::MeasureError;
use crate::features::Feature;
use crate::noise::RawSmooth;
use crate::smooth::SmoothMethod;
use crate::spectrum::Spectrum;
use crate::tools::{ContinuumMode, Header, Tool};
use crate::uncertainty::{Covariance, MonteCarlo, UncertaintyReport};

/// How the measurement's uncertainty is obtained.
#[derive(Debug, Clone, Default)]
pub enum Propagation {
    #[default]
    Skip,
    MonteCarlo(EngineConfig),
    Covariance,
}

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub measurement: Measurement,
    pub report: Option<UncertaintyReport>,
    pub header: Header,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    smoother: SmoothMethod,
    estimator: Option<RawSmooth>,
    propagation: Propagation,
}

impl Pipeline {
    pub fn new(smoother: SmoothMethod) -> Self {
        Self {
            smoother,
            estimator: None,
            propagation: Propagation::Skip,
        }
    }

    /// Replace the spectrum's error by a [`RawSmooth`] estimate after smoothing.
    pub fn estimate_error(mut self, estimator: RawSmooth) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn propagate(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn smoother(&self) -> &SmoothMethod {
        &self.smoother
    }

    /// Smooth (automatic parameters unless some are stored) and, if asked,
    /// estimate the error. The results are applied to `spectrum`.
    pub fn prepare(&mut self, spectrum: &mut Spectrum) -> Result<(), MeasureError> {
        let smooth = if self.smoother.has_parameters() {
            self.smoother.resmooth(spectrum)?
        } else {
            self.smoother.smooth_auto(spectrum)?
        };
        spectrum.set_smooth(Some(smooth))?;
        log::debug!("pipeline: smoothed with {}", self.smoother.name());

        if let Some(estimator) = self.estimator.as_mut() {
            let params = match estimator.get_parameters() {
                Some(p) => p,
                None => estimator.auto(spectrum)?,
            };
            let error = estimator.estimate(spectrum, params)?;
            spectrum.set_error(Some(error))?;
            log::debug!("pipeline: error estimated with {}", RawSmooth::NAME);
        }
        Ok(())
    }

    /// Execute the full pipeline for one feature.
    pub fn run<F: Feature>(
        &mut self,
        spectrum: &mut Spectrum,
        feature: &mut F,
        params: F::Params,
    ) -> Result<RunOutput, MeasureError> {
        // 1) Smooth and estimate the error.
        self.prepare(spectrum)?;

        // 2) Measure with the fixed continuum.
        let measurement = feature.measure(spectrum, params, ContinuumMode::Fixed)?;

        // 3) Propagate.
        let report = match &self.propagation {
            Propagation::Skip => None,
            Propagation::MonteCarlo(config) => {
                let smoother = F::DEPENDENCIES
                    .contains(&crate::tools::Dependency::MethodSmooth)
                    .then_some(&self.smoother);
                Some(MonteCarlo::new(config.clone()).run(spectrum, feature, smoother)?)
            }
            Propagation::Covariance => Some(Covariance::new().run(spectrum, feature)?),
        };

        // 4) Collect parameters for the next run.
        let mut header = Header::new();
        self.smoother.update_header(&mut header)?;
        if let Some(estimator) = &self.estimator {
            estimator.update_header(&mut header)?;
        }
        feature.update_header(&mut header)?;

        Ok(RunOutput { measurement, report, header })
    }
}
