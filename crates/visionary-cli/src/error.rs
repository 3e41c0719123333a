//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// The generated test still fails after healing
    #[error("Test '{name}' failed after {attempts} attempt(s)")]
    TestFailed {
        /// Test case name
        name: String,
        /// Attempts made
        attempts: usize,
    },

    /// Elements of an assets document did not resolve on the page
    #[error("{count} element(s) could not be resolved on {url}")]
    Unresolved {
        /// Unresolved element count
        count: usize,
        /// Page URL
        url: String,
    },

    /// Feature compiled out
    #[error("{feature} support not enabled. Rebuild with --features {feature}")]
    FeatureDisabled {
        /// Cargo feature name
        feature: &'static str,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Visionary library error
    #[error(transparent)]
    Visionary(#[from] visionary::VisionaryError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
