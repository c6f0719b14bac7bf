//! package.json descriptors and npm version ranges
//!
//! This crate reads the `package.json` manifests that pkgproxy needs: the
//! consuming project's manifest (for the declared dependency ranges) and the
//! manifest of each local package source (for its name and version).

pub mod descriptor;
pub mod error;
pub mod range;

pub use descriptor::{Person, PackageJson, Repository, MANIFEST_FILE};
pub use error::{ManifestError, Result};
pub use range::VersionRange;

use std::path::Path;

/// Read `package.json` from a package directory
pub fn from_dir(dir: impl AsRef<Path>) -> Result<PackageJson> {
    from_path(dir.as_ref().join(MANIFEST_FILE))
}

/// Parse a manifest from a file path
pub fn from_path(path: impl AsRef<Path>) -> Result<PackageJson> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ManifestError::NotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ManifestError::Io(e.to_string()))?;
    from_str(&contents)
}

/// Parse a manifest from a string
pub fn from_str(s: &str) -> Result<PackageJson> {
    serde_json::from_str(s).map_err(|e| ManifestError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_basic_manifest_parse() {
        let json = r#"{
            "name": "@acme/ui",
            "version": "1.0.0",
            "dependencies": { "lit": "^3.0.0" }
        }"#;

        let manifest = from_str(json).unwrap();
        assert_eq!(manifest.name, "@acme/ui");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.dependencies.get("lit").unwrap(), "^3.0.0");
    }

    #[test]
    fn test_from_dir_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = from_dir(temp.path()).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn test_from_dir_malformed_manifest() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let err = from_dir(temp.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }
}
