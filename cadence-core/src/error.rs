//! Error types for Cadence operations

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

/// Crate-level errors.
///
/// These are raised synchronously out of constructors, configuration loading
/// and export. Failures that happen while a kickoff walks its stages never
/// surface here; they are recorded on the kickoff's result as a
/// [`KickoffError`].
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    /// Malformed pipeline or runner configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kickoff failure lifted out of a result
    #[error(transparent)]
    Kickoff(#[from] KickoffError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CadenceError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        CadenceError::Configuration(message.into())
    }
}

impl From<String> for CadenceError {
    fn from(s: String) -> Self {
        CadenceError::Other(s)
    }
}

impl From<&str> for CadenceError {
    fn from(s: &str) -> Self {
        CadenceError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for CadenceError {
    fn from(err: anyhow::Error) -> Self {
        CadenceError::Other(err.to_string())
    }
}

impl From<figment::Error> for CadenceError {
    fn from(err: figment::Error) -> Self {
        CadenceError::Configuration(err.to_string())
    }
}

/// One failed branch of a parallel group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFailure {
    /// Position of the unit within its group
    pub branch: usize,
    /// Name of the failing unit
    pub unit: String,
    /// Rendered error
    pub message: String,
}

/// Why a single kickoff stopped before walking every stage.
///
/// Kept `Clone + Serialize` so it can be stored on a
/// [`KickoffResult`](crate::pipeline::KickoffResult) and exported with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KickoffError {
    /// The processor was handed a stage it cannot execute
    #[error("Stage {stage_index} is not executable: {reason}")]
    UnsupportedStage { stage_index: usize, reason: String },

    /// A work unit or route selector returned an error or panicked
    #[error("Work unit '{unit}' failed at stage {stage_index}: {message}")]
    WorkUnitExecution {
        stage_index: usize,
        unit: String,
        message: String,
    },

    /// At least one branch of a parallel group failed
    #[error("{} of {branches} branches failed at stage {stage_index}", .failures.len())]
    GroupPartialFailure {
        stage_index: usize,
        branches: usize,
        failures: Vec<BranchFailure>,
    },

    /// The run deadline elapsed while the kickoff was still in flight
    #[error("Kickoff timed out after {deadline:?}")]
    Timeout {
        /// Stage that was executing when the deadline hit, if any
        stage_index: Option<usize>,
        #[serde(with = "humantime_serde")]
        deadline: Duration,
    },

    /// The kickoff task itself died before reporting a result
    #[error("Kickoff task aborted: {message}")]
    Aborted { message: String },
}

impl KickoffError {
    /// Index of the stage the failure is attributed to
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            KickoffError::UnsupportedStage { stage_index, .. }
            | KickoffError::WorkUnitExecution { stage_index, .. }
            | KickoffError::GroupPartialFailure { stage_index, .. } => Some(*stage_index),
            KickoffError::Timeout { stage_index, .. } => *stage_index,
            KickoffError::Aborted { .. } => None,
        }
    }

    /// Whether the failure was caused by the run deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, KickoffError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_index() {
        let err = KickoffError::WorkUnitExecution {
            stage_index: 2,
            unit: "summarize".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.stage_index(), Some(2));
        assert!(!err.is_timeout());

        let err = KickoffError::Timeout {
            stage_index: None,
            deadline: Duration::from_secs(1),
        };
        assert_eq!(err.stage_index(), None);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_group_failure_display() {
        let err = KickoffError::GroupPartialFailure {
            stage_index: 1,
            branches: 3,
            failures: vec![BranchFailure {
                branch: 2,
                unit: "c".to_string(),
                message: "nope".to_string(),
            }],
        };
        assert_eq!(err.to_string(), "1 of 3 branches failed at stage 1");
    }

    #[test]
    fn test_kickoff_error_serializes_with_kind_tag() {
        let err = KickoffError::UnsupportedStage {
            stage_index: 0,
            reason: "empty parallel group".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unsupported_stage");
        assert_eq!(json["stage_index"], 0);
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: CadenceError = anyhow::anyhow!("upstream went away").into();
        assert_eq!(err.to_string(), "upstream went away");
    }
}
