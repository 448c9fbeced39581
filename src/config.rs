//! Engine settings for the Monte Carlo propagation.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file in the working directory:
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `MISFITS_TRIALS` | number of resampled trials | 1000 |
//! | `MISFITS_SEED` | top-level random seed | 0 |
//! | `MISFITS_RESAMPLING` | `uniform` or `gaussian` flux draws | `uniform` |
//! | `MISFITS_THREADS` | worker threads, unset for rayon's global pool | unset |

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;
use crate::spectrum::ResamplingDistribution;

pub const DEFAULT_TRIALS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub trials: usize,
    pub seed: u64,
    pub resampling: ResamplingDistribution,
    pub threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            seed: 0,
            resampling: ResamplingDistribution::Uniform,
            threads: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `MISFITS_*` variables.
    pub fn from_env() -> Result<Self, MeasureError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// As [`EngineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MeasureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            trials: parse_var(&lookup, "MISFITS_TRIALS")?.unwrap_or(defaults.trials),
            seed: parse_var(&lookup, "MISFITS_SEED")?.unwrap_or(defaults.seed),
            resampling: parse_var(&lookup, "MISFITS_RESAMPLING")?.unwrap_or(defaults.resampling),
            threads: parse_var(&lookup, "MISFITS_THREADS")?,
        };
        config.validate()?;
        log::debug!("engine config: {config:?}");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.trials == 0 {
            return Err(MeasureError::InvalidInput("at least one trial is required".into()));
        }
        if self.threads == Some(0) {
            return Err(MeasureError::InvalidInput("thread count must be positive".into()));
        }
        Ok(())
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_resampling(mut self, resampling: ResamplingDistribution) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, MeasureError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| MeasureError::InvalidInput(format!("{key}: cannot parse '{raw}'")))
}
