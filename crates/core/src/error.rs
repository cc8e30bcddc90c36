//! Error taxonomy shared by every component.
//!
//! - [`ValidationError`]: malformed or out-of-range input, rejected at the boundary.
//! - [`DegradedComputation`]: an indicator category could not produce a real score.
//! - [`FatalPersistenceError`]: the governor's store was unreachable.
//! - [`ConfigError`]: invalid configuration or a lost copy-on-write race.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input rejected at a component boundary. Never coerced into a valid value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Score is non-finite or outside [0, 100].
    #[error("score must be a finite value in [0, 100], got {0}")]
    ScoreOutOfRange(f64),

    /// Price is non-finite or not strictly positive.
    #[error("{field} must be a finite positive price, got {value}")]
    NonPositivePrice {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// Direction is not supported by the operation (e.g. NEUTRAL for stop sizing).
    #[error("unsupported direction: {0}")]
    UnsupportedDirection(String),

    /// A required numeric field is NaN or infinite.
    #[error("{field} is not a finite number")]
    NonFinite {
        /// Name of the offending field.
        field: String,
    },

    /// Structurally invalid input (wrong shape, impossible values).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A configuration value violates its contract.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ValidationError {
    /// Convenience constructor for [`ValidationError::Malformed`].
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Convenience constructor for [`ValidationError::InvalidConfig`].
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Convenience constructor for [`ValidationError::NonFinite`].
    pub fn non_finite(field: impl Into<String>) -> Self {
        Self::NonFinite {
            field: field.into(),
        }
    }
}

/// Returns `Ok(value)` if finite, otherwise [`ValidationError::NonFinite`].
///
/// # Errors
/// Returns an error if `value` is NaN or infinite.
pub fn ensure_finite(field: &str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::non_finite(field))
    }
}

/// Why an indicator category produced no usable score.
///
/// Absorbed by the aggregator: the category is dropped and the remaining
/// weights are renormalized.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum DegradedComputation {
    /// Not enough history for the computation.
    #[error("insufficient history: need {required}, have {available}")]
    InsufficientHistory {
        /// Minimum number of observations required.
        required: usize,
        /// Observations available.
        available: usize,
    },

    /// A required input (order book, trade tape, timeframe) was absent.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// The computation produced a non-finite intermediate.
    #[error("numeric failure: {0}")]
    Numeric(String),
}

/// The governor's persistence store could not be reached.
///
/// Resolved to "no state change" and surfaced only via the governor status.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("persistence failure during {operation}: {message}")]
pub struct FatalPersistenceError {
    /// Operation that was being attempted.
    pub operation: String,
    /// Underlying error message.
    pub message: String,
}

impl FatalPersistenceError {
    /// Wraps an arbitrary error for the given operation.
    pub fn new(operation: impl Into<String>, err: &anyhow::Error) -> Self {
        Self {
            operation: operation.into(),
            message: format!("{err:#}"),
        }
    }
}

/// Errors from the versioned configuration store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// Another writer published first; re-read `current()` and rebase.
    #[error("config version conflict: expected next version {expected}, got {found}")]
    VersionConflict {
        /// The version the store would accept.
        expected: u64,
        /// The version that was offered.
        found: u64,
    },

    /// The offered configuration failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_finite_accepts_numbers() {
        assert_eq!(ensure_finite("x", 1.5), Ok(1.5));
    }

    #[test]
    fn ensure_finite_rejects_nan_and_inf() {
        assert!(ensure_finite("x", f64::NAN).is_err());
        assert!(ensure_finite("x", f64::INFINITY).is_err());
    }

    #[test]
    fn validation_error_messages_name_the_field() {
        let err = ValidationError::NonPositivePrice {
            field: "entry_price",
            value: -1.0,
        };
        assert!(err.to_string().contains("entry_price"));
    }

    #[test]
    fn persistence_error_keeps_operation() {
        let err = FatalPersistenceError::new("load_state", &anyhow::anyhow!("connection refused"));
        assert_eq!(err.operation, "load_state");
        assert!(err.to_string().contains("connection refused"));
    }
}
