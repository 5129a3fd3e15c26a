//! Domain-level error taxonomy for the Fourier verifier.

use crate::classifier::ClassifierError;
use crate::extract::ParseError;
use crate::gateway::GatewayError;
use crate::session::SessionError;

/// Errors produced by hard validation of a code-translation reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslationError {
    #[error("response missing '{field}' field")]
    MissingField { field: String },

    #[error("field '{field}' has invalid type: expected {expected}")]
    InvalidType { field: String, expected: String },

    #[error("coefficient list '{field}' has length {got}, expected {expected}")]
    CoefficientLength {
        field: String,
        expected: usize,
        got: usize,
    },

    #[error("response has neither 'fourier_reconstruction' nor 'coefficients'")]
    NoReconstruction,
}

/// Top-level errors for the Fourier verifier.
#[derive(Debug, thiserror::Error)]
pub enum FourierError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("session log error: {0}")]
    Session(#[from] SessionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Fourier verifier operations.
pub type Result<T> = std::result::Result<T, FourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourier_error_display() {
        let err = FourierError::InvalidRequest("period must be positive".to_string());
        assert!(err.to_string().contains("invalid request"));

        let err = FourierError::InvalidConfig("max_iterations must be at least 1".to_string());
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn test_translation_error_converts() {
        let err: FourierError = TranslationError::MissingField {
            field: "original_function".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("translation error"));
        assert!(msg.contains("original_function"));
    }

    #[test]
    fn test_coefficient_length_error() {
        let err = TranslationError::CoefficientLength {
            field: "an".to_string(),
            expected: 5,
            got: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("an"));
        assert!(msg.contains('5'));
        assert!(msg.contains('3'));
    }
}
