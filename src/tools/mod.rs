//! The parameter contract shared by smoothers, estimators and features.
//!
//! Every tool declares:
//!
//! - a `NAME` used as the header prefix
//! - its ordered `PARAMETERS`, backed by a typed, serializable parameter set
//! - its `DEPENDENCIES` on upstream state
//!
//! Parameters can be stored, cloned out, replaced and cleared, and they
//! round-trip through a name -> JSON map so an uncertainty engine (or a saved
//! header) can replay a tool's configuration without knowing its internals.

pub mod header;

pub use header::Header;

use std::collections::BTreeMap;
use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::MeasureError;
use crate::spectrum::Spectrum;

/// Named parameter values, keyed by parameter name.
pub type ParameterMap = BTreeMap<String, Value>;

/// Upstream state a tool needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// `spectrum.smooth` must be set.
    SpectrumSmooth,
    /// `spectrum.error` must be set.
    SpectrumError,
    /// A smoother must be supplied alongside the tool.
    MethodSmooth,
}

impl Dependency {
    pub fn key(&self) -> &'static str {
        match self {
            Dependency::SpectrumSmooth => "spectrum.smooth",
            Dependency::SpectrumError => "spectrum.error",
            Dependency::MethodSmooth => "method.smooth",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Dependency::SpectrumSmooth => "smoothed flux of the spectrum",
            Dependency::SpectrumError => "per-sample flux error of the spectrum",
            Dependency::MethodSmooth => "smoothing method used to build the smoothed flux",
        }
    }

    /// Whether the spectrum-side part of this dependency is met.
    ///
    /// `MethodSmooth` also needs the smoothed flux; the smoother itself is
    /// checked by whoever drives the tool.
    pub fn satisfied_by(&self, spectrum: &Spectrum) -> bool {
        match self {
            Dependency::SpectrumSmooth | Dependency::MethodSmooth => spectrum.has_smooth(),
            Dependency::SpectrumError => spectrum.has_error(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Whether a feature should randomise its continuum before measuring.
///
/// Only the Monte Carlo engine asks for `Perturbed`; the seed makes each
/// trial's perturbation reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuumMode {
    #[default]
    Fixed,
    Perturbed {
        seed: u64,
    },
}

impl ContinuumMode {
    /// Random source for a perturbed run, `None` when fixed.
    pub fn rng(&self) -> Option<StdRng> {
        match self {
            ContinuumMode::Fixed => None,
            ContinuumMode::Perturbed { seed } => Some(StdRng::seed_from_u64(*seed)),
        }
    }
}

pub trait Tool {
    const NAME: &'static str;
    const PARAMETERS: &'static [&'static str];
    const DEPENDENCIES: &'static [Dependency];

    type Params: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync;

    /// Currently stored parameters.
    fn parameters(&self) -> Option<&Self::Params>;

    /// Replace (or clear, with `None`) the stored parameters.
    fn store_parameters(&mut self, params: Option<Self::Params>);

    /// Deep copy of the stored parameters, `None` when unset.
    fn get_parameters(&self) -> Option<Self::Params> {
        self.parameters().cloned()
    }

    fn set_parameters(&mut self, params: Self::Params) {
        self.store_parameters(Some(params));
    }

    fn del_parameters(&mut self) {
        self.store_parameters(None);
    }

    /// Fail with `MissingDependency` unless every spectrum-side dependency holds.
    fn check_dependencies(spectrum: &Spectrum) -> Result<(), MeasureError> {
        match Self::DEPENDENCIES.iter().find(|d| !d.satisfied_by(spectrum)) {
            Some(dep) => Err(MeasureError::MissingDependency(dep.key())),
            None => Ok(()),
        }
    }

    /// Stored parameters as a name -> JSON map.
    fn parameter_map(&self) -> Result<Option<ParameterMap>, MeasureError> {
        let Some(params) = self.parameters() else {
            return Ok(None);
        };
        match serde_json::to_value(params)? {
            Value::Object(fields) => Ok(Some(fields.into_iter().collect())),
            other => Err(MeasureError::Serialization(format!(
                "{} parameters did not serialize to a map: {other}",
                Self::NAME
            ))),
        }
    }

    /// Set parameters from a map; every declared name must be present.
    fn set_parameters_from_map(&mut self, map: &ParameterMap) -> Result<(), MeasureError> {
        let mut fields = serde_json::Map::new();
        for &name in Self::PARAMETERS {
            let value = map
                .get(name)
                .ok_or_else(|| MeasureError::MissingParameter(name.to_string()))?;
            fields.insert(name.to_string(), value.clone());
        }
        let params: Self::Params = serde_json::from_value(Value::Object(fields))?;
        self.set_parameters(params);
        Ok(())
    }

    /// Write the stored parameters into `header` as `NAME.param` entries.
    fn update_header(&self, header: &mut Header) -> Result<(), MeasureError> {
        let map = self
            .parameter_map()?
            .ok_or_else(|| MeasureError::MissingParameter(format!("{} parameters", Self::NAME)))?;
        for (name, value) in map {
            header.insert(Header::key(Self::NAME, &name), value);
        }
        Ok(())
    }

    /// Restore parameters previously written by [`Tool::update_header`].
    fn set_parameters_from_header(&mut self, header: &Header) -> Result<(), MeasureError> {
        let mut map = ParameterMap::new();
        for &name in Self::PARAMETERS {
            let key = Header::key(Self::NAME, name);
            let value = header
                .get(&key)
                .ok_or(MeasureError::MissingParameter(key.clone()))?;
            map.insert(name.to_string(), value.clone());
        }
        self.set_parameters_from_map(&map)
    }
}
