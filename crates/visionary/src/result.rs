//! Result and error types for Visionary.

use crate::resolver::CandidateAttempt;
use thiserror::Error;

/// Result type for Visionary operations
pub type VisionaryResult<T> = Result<T, VisionaryError>;

/// Errors that can occur in Visionary
#[derive(Debug, Error)]
pub enum VisionaryError {
    /// Assets document failed to parse or validate
    #[error("Invalid assets document: {message}")]
    Schema {
        /// Error message
        message: String,
    },

    /// No candidate resolved, even after the extended wait on the first one
    #[error("Element not found: {description} ({tried} candidates tried)")]
    ElementNotFound {
        /// Human-readable element description
        description: String,
        /// Number of candidates tried
        tried: usize,
        /// Per-candidate attempt log
        attempts: Vec<CandidateAttempt>,
    },

    /// Browser driver error
    #[error("Browser driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Asset generator (LLM provider) error
    #[error("Asset generation failed: {message}")]
    Generator {
        /// Error message
        message: String,
    },

    /// Code generation or test execution collaborator error
    #[error("Execution failed: {message}")]
    Execution {
        /// Error message
        message: String,
    },

    /// Knowledge base persistence error
    #[error("Knowledge base error: {message}")]
    Knowledge {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl VisionaryError {
    /// Create a schema error
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create a generator error
    #[must_use]
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator {
            message: message.into(),
        }
    }

    /// Create an execution error
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a knowledge base error
    #[must_use]
    pub fn knowledge(message: impl Into<String>) -> Self {
        Self::Knowledge {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Attempt log carried by an [`VisionaryError::ElementNotFound`], if any
    #[must_use]
    pub fn attempts(&self) -> Option<&[CandidateAttempt]> {
        match self {
            Self::ElementNotFound { attempts, .. } => Some(attempts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_not_found_message() {
        let err = VisionaryError::ElementNotFound {
            description: "login Button".to_string(),
            tried: 3,
            attempts: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("login Button"));
        assert!(msg.contains("3 candidates"));
        assert_eq!(err.attempts().map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_helpers_pick_variants() {
        assert!(matches!(
            VisionaryError::schema("x"),
            VisionaryError::Schema { .. }
        ));
        assert!(VisionaryError::knowledge("disk full")
            .to_string()
            .contains("disk full"));
        assert!(VisionaryError::config("bad").attempts().is_none());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VisionaryError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
