//! Error types for veilcast.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VeilcastError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Face detection errors
    #[error("Face detection model not found at {path}")]
    DetectorModelNotFound { path: String },

    #[error("Face detection backend unavailable: {message}")]
    DetectorUnavailable { message: String },

    #[error("Face detection failed: {message}")]
    Detection { message: String },

    // Capability probing
    #[error("Stream probe failed: {message}")]
    Probe { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VeilcastError {
    /// Returns true for errors that must stop the process at startup.
    ///
    /// Nothing downstream can succeed with a broken configuration or a missing
    /// model, so these are never retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            VeilcastError::ConfigFileNotFound { .. }
                | VeilcastError::ConfigParse { .. }
                | VeilcastError::ConfigInvalidValue { .. }
                | VeilcastError::Config(_)
                | VeilcastError::DetectorModelNotFound { .. }
                | VeilcastError::DetectorUnavailable { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VeilcastError>;
