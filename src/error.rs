//! Error types for Wearlab

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while configuring, uploading, processing or summarizing
#[derive(Debug, Error)]
pub enum LabError {
    /// Size or format violation caught before any network call
    #[error("Input rejected: {0}")]
    InputRejected(String),

    /// Network-level failure, no server response
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Non-2xx response carrying a structured error message
    #[error("Server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// Column structures differ across the files of a batch
    #[error("Column validation failed: {0}. Files must have identical column structures.")]
    ValidationFailure(String),

    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A response arrived for a request that a newer action superseded
    #[error("Response belongs to a superseded request")]
    StaleResponse,
}

impl LabError {
    /// Classify this error for storage in session state
    pub fn kind(&self) -> FailureKind {
        match self {
            LabError::InputRejected(_) => FailureKind::InputRejected,
            LabError::TransportFailure(_) => FailureKind::TransportFailure,
            LabError::ServerRejected { .. } => FailureKind::ServerRejected,
            LabError::ValidationFailure(_) => FailureKind::ValidationFailure,
            LabError::ParseError(_) | LabError::JsonError(_) | LabError::StaleResponse => {
                FailureKind::Parse
            }
        }
    }
}

/// Failure category recorded by the state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputRejected,
    TransportFailure,
    ServerRejected,
    ValidationFailure,
    Parse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_mentions_identical_structures() {
        let err = LabError::ValidationFailure("file 3 is missing column z".to_string());
        assert_eq!(
            err.to_string(),
            "Column validation failed: file 3 is missing column z. Files must have identical column structures."
        );
        assert_eq!(err.kind(), FailureKind::ValidationFailure);
    }

    #[test]
    fn test_json_errors_classify_as_parse() {
        let err: LabError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), FailureKind::Parse);
    }
}
