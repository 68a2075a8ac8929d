//! Error taxonomy for the control stack.
//!
//! All failures are local and synchronous. Nothing is retried automatically:
//! a configuration error is fatal to the instance being built or reloaded, a
//! numerical instability leaves the plant at its last finite state, and an
//! unknown mode selector is rejected before any state changes.

use thiserror::Error;

/// Invalid motor or controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A field that must be strictly positive is zero or negative.
    #[error("`{field}` must be > 0")]
    NonPositive { field: &'static str },
    /// A field is NaN or infinite.
    #[error("`{field}` must be finite")]
    NonFinite { field: &'static str },
    /// A bounded field lies outside its admissible interval.
    #[error("`{field}` is out of range")]
    OutOfRange { field: &'static str },
    #[error("pole-pair count must be at least 1")]
    ZeroPolePairs,
}

/// Which closed set a rejected mode selector was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeSelector {
    /// `voltage | speed | lookup`
    FluxWeakening,
    /// `observer | adaptive | robust | combined`
    DisturbanceRejection,
    /// `sliding | static`
    RobustLaw,
}

impl core::fmt::Display for ModeSelector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ModeSelector::FluxWeakening => f.write_str("flux-weakening method"),
            ModeSelector::DisturbanceRejection => f.write_str("disturbance-rejection mode"),
            ModeSelector::RobustLaw => f.write_str("robust control law"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// The plant produced a NaN/Inf state; the step was discarded.
    #[error("non-finite plant state at integration step {step}")]
    NumericalInstability { step: u64 },
    #[error("unrecognized {0}")]
    InvalidMode(ModeSelector),
}

/// Reject NaN/Inf before checking the sign, so the error names the real fault.
pub(crate) fn ensure_positive(value: f64, field: &'static str) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { field });
    }
    if value <= 0.0 {
        return Err(ConfigError::NonPositive { field });
    }
    Ok(())
}

/// `value` must lie in the half-open interval `(low, high]`.
pub(crate) fn ensure_in_range(
    value: f64,
    low: f64,
    high: f64,
    field: &'static str,
) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { field });
    }
    if value <= low || value > high {
        return Err(ConfigError::OutOfRange { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_check() {
        assert!(ensure_positive(1e-3, "Ld").is_ok());
        assert_eq!(
            ensure_positive(0.0, "Ld"),
            Err(ConfigError::NonPositive { field: "Ld" })
        );
        assert_eq!(
            ensure_positive(f64::NAN, "Ld"),
            Err(ConfigError::NonFinite { field: "Ld" })
        );
    }

    #[test]
    fn test_range_check_is_half_open() {
        assert!(ensure_in_range(1.0, 0.0, 1.0, "lambda").is_ok());
        assert!(ensure_in_range(0.0, 0.0, 1.0, "lambda").is_err());
        assert!(ensure_in_range(1.01, 0.0, 1.0, "lambda").is_err());
    }

    #[test]
    fn test_config_error_converts() {
        let err: Error = ConfigError::ZeroPolePairs.into();
        assert_eq!(err, Error::Configuration(ConfigError::ZeroPolePairs));
    }
}
