//! Error types for package resolution and archiving

use pkgproxy_manifest::ManifestError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackageError>;

/// Reasons a local package could not be served
///
/// Every variant except `InvalidOverride` is a soft failure from the proxy's
/// point of view: the request for that package is forwarded upstream instead.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Package {package} is not a dependency of the project at {}", project.display())]
    UndeclaredDependency { package: String, project: PathBuf },

    #[error("Local {package} {version} does not satisfy the project's range {constraint}")]
    VersionDrift {
        package: String,
        version: String,
        constraint: String,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),
}

impl PackageError {
    /// The local source exists but its version is outside the declared range
    pub fn is_version_drift(&self) -> bool {
        matches!(self, PackageError::VersionDrift { .. })
    }
}

impl From<walkdir::Error> for PackageError {
    fn from(err: walkdir::Error) -> Self {
        PackageError::Archive(err.to_string())
    }
}

impl From<tempfile::PersistError> for PackageError {
    fn from(err: tempfile::PersistError) -> Self {
        PackageError::Archive(format!("Failed to move archive into place: {}", err.error))
    }
}
