// SPDX-License-Identifier: MIT

//! Errors raised by the leaf building blocks: output parsing and model calls

use thiserror::Error;

/// Structured-output parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty model output")]
    EmptyInput,

    #[error("Unable to locate any valid JSON fragment")]
    NoJsonFound,

    #[error("Unable to locate any XML element")]
    NoXmlFound,

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Missing required fields: {0:?}")]
    MissingFields(Vec<String>),
}

/// Model caller errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (DNS, connection reset, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with an error status
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("API key not configured")]
    ApiKeyMissing,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModelError {
    /// Whether a retry has a reasonable chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::Timeout { .. } => true,
            ModelError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ModelError::Network("reset".into()).is_transient());
        assert!(ModelError::Timeout { secs: 60 }.is_transient());
        assert!(ModelError::Provider {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(ModelError::Provider {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!ModelError::Provider {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ModelError::ApiKeyMissing.is_transient());
    }
}
