//! Result and error types for Vistazo.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for Vistazo operations
pub type VistazoResult<T> = Result<T, VistazoError>;

/// Errors that can occur in Vistazo
#[derive(Debug, Error)]
pub enum VistazoError {
    /// An image file could not be read or parsed
    #[error("Failed to decode image {}: {message}", path.display())]
    Decode {
        /// Path (or pseudo-path for in-memory data) of the image
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The browser driver failed to produce a screenshot
    #[error("Capture of {url} failed: {message}")]
    Capture {
        /// URL that was being captured
        url: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("{operation} timed out after {ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Image processing error (resizing, encoding, etc.)
    #[error("Image processing failed: {message}")]
    ImageProcessing {
        /// Error message
        message: String,
    },

    /// Configuration value out of range or unparsable
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Image store layout could not be created or written
    #[error("Image store error at {}: {message}", path.display())]
    Store {
        /// Directory or file involved
        path: PathBuf,
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

impl VistazoError {
    /// Create a decode error for a path
    #[must_use]
    pub fn decode(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a capture error for a URL
    #[must_use]
    pub fn capture(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capture {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an image store error
    #[must_use]
    pub fn store(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether this error came from decoding an image
    #[must_use]
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Whether this error came from the capture collaborator (including timeouts)
    #[must_use]
    pub const fn is_capture(&self) -> bool {
        matches!(self, Self::Capture { .. } | Self::Timeout { .. })
    }
}
