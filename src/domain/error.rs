//! Error types for gate prediction
//!
//! `PredictError` covers per-submission rejections. None of them are fatal and
//! none of them leave partial state behind. `ConfigError` is raised once at
//! startup and is fatal.

use crate::domain::types::UserId;
use thiserror::Error;

/// Rejection of a single submission or control operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    /// Signal inputs reference a gate outside the configured set
    #[error("unknown gate {gate:?} in {field} signals")]
    UnknownGate { gate: String, field: &'static str },

    /// A required signal value is missing and no fallback is configured
    #[error("missing {field} signal for gate {gate}")]
    MalformedSnapshot { gate: String, field: &'static str },

    /// A signal value is present but is not a finite number
    #[error("non-finite {field} signal for gate {gate}")]
    NonFiniteSignal { gate: String, field: &'static str },

    /// New sample is older than the newest stored sample for the user
    #[error("clock regression for user {user}: {attempted} ms < {previous} ms")]
    ClockRegression { user: UserId, previous: u64, attempted: u64 },

    /// In-transit flag requested for a user with no active dispatch
    #[error("user {user} has no active dispatch")]
    NotDispatched { user: UserId },
}

impl PredictError {
    /// Stable snake_case identifier used in metrics and HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::UnknownGate { .. } => "unknown_gate",
            PredictError::MalformedSnapshot { .. } => "malformed_snapshot",
            PredictError::NonFiniteSignal { .. } => "malformed_snapshot",
            PredictError::ClockRegression { .. } => "clock_regression",
            PredictError::NotDispatched { .. } => "not_dispatched",
        }
    }
}

/// Invalid configuration, detected once at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("gate set must contain at least one gate")]
    EmptyGateSet,

    #[error("gate ids must not be blank")]
    BlankGateId,

    #[error("gate {0:?} is configured more than once")]
    DuplicateGate(String),

    #[error("scoring weight {name} must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("dispatch spacing window {min_ms}..={max_ms} ms is empty")]
    InvalidSpacing { min_ms: u64, max_ms: u64 },

    #[error("history capacity must be at least 2, got {0}")]
    HistoryTooSmall(usize),

    #[error("confidence threshold must be below 100, got {0}")]
    InvalidThreshold(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = PredictError::UnknownGate { gate: "Z".into(), field: "ble" };
        assert_eq!(err.kind(), "unknown_gate");
        assert_eq!(err.to_string(), "unknown gate \"Z\" in ble signals");

        let err = PredictError::ClockRegression {
            user: UserId::new("u1"),
            previous: 5000,
            attempted: 4000,
        };
        assert_eq!(err.kind(), "clock_regression");
        assert!(err.to_string().contains("u1"));
    }
}
