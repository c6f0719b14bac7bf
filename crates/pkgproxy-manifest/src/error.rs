//! Error types for manifest parsing and version ranges

use std::path::PathBuf;
use thiserror::Error;

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;

/// Errors that can occur while reading manifests
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest file does not exist
    #[error("package.json not found at {}", .0.display())]
    NotFound(PathBuf),

    /// I/O error reading manifest file
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON parsing error
    #[error("Failed to parse package.json: {0}")]
    Parse(String),

    /// Invalid version
    #[error("Invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// Invalid or unsupported version range
    #[error("Invalid version range '{0}': {1}")]
    InvalidRange(String, String),
}
