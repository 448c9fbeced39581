//! Error taxonomy for the measurement engine.
//!
//! Three groups matter to callers:
//!
//! - validation errors (bad arrays, bad parameters) -> exit code 2
//! - prerequisite errors (a tool ran before its dependencies) -> exit code 3
//! - numerical errors that abort a whole stage -> exit code 4
//!
//! Per-interval fit failures are *not* errors; they surface as `None` values in
//! the measurement so the enclosing loop can continue.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasureError {
    /// Malformed wavelength/flux/error/smooth arrays.
    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),

    /// Malformed tool arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A named tool parameter was not supplied.
    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    /// A lazily derived quantity was requested but its source is absent
    /// (e.g. `smooth` before any smoother ran).
    #[error("{0} is not available")]
    Unavailable(&'static str),

    /// A declared tool dependency is not satisfied.
    #[error("dependency '{0}' not satisfied")]
    MissingDependency(&'static str),

    /// A computation that cannot be reported as a per-interval failure.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Header/report (de)serialization problems.
    #[error("serialization: {0}")]
    Serialization(String),
}

impl MeasureError {
    /// Process exit code an outer CLI should use for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MeasureError::InvalidSpectrum(_)
            | MeasureError::InvalidInput(_)
            | MeasureError::MissingParameter(_)
            | MeasureError::Serialization(_) => 2,
            MeasureError::Unavailable(_) | MeasureError::MissingDependency(_) => 3,
            MeasureError::Numerical(_) => 4,
        }
    }

    /// True when the error means "wrong order of operations" rather than bad data.
    pub fn is_prerequisite(&self) -> bool {
        matches!(
            self,
            MeasureError::Unavailable(_) | MeasureError::MissingDependency(_)
        )
    }
}

impl From<serde_json::Error> for MeasureError {
    fn from(err: serde_json::Error) -> Self {
        MeasureError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_errors_are_distinct_from_validation() {
        let missing = MeasureError::Unavailable("smoothed flux");
        let bad = MeasureError::InvalidSpectrum("flux includes non-finite values".into());
        assert!(missing.is_prerequisite());
        assert!(!bad.is_prerequisite());
        assert_eq!(missing.exit_code(), 3);
        assert_eq!(bad.exit_code(), 2);
        assert_eq!(missing.to_string(), "smoothed flux is not available");
    }
}
