//! Archive cache directory

use crate::error::{PackageError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding generated package archives
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    /// Root cache directory
    root: PathBuf,
}

impl ArchiveCache {
    /// Create a cache rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache directory if needed
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            PackageError::Cache(format!(
                "Failed to create cache directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Path of an archive file inside the cache
    ///
    /// Returns `None` for names that would escape the cache directory and
    /// for anything that is not a finished archive, such as the temporary
    /// file an archive is written to.
    pub fn path_for(&self, file_name: &str) -> Option<PathBuf> {
        let valid = is_archive_name(file_name)
            && !file_name.contains(['/', '\\'])
            && !file_name.contains("..");
        valid.then(|| self.root.join(file_name))
    }

    /// Names of the archives currently cached, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .map_err(|e| PackageError::Cache(format!("Failed to read cache directory: {}", e)))?
        {
            let entry = entry.map_err(|e| {
                PackageError::Cache(format!("Failed to read cache directory entry: {}", e))
            })?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_archive_name(&name) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Get the size of the cache in bytes
    pub fn size(&self) -> Result<u64> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| {
                PackageError::Cache(format!("Failed to walk cache directory: {}", e))
            })?;

            if entry.file_type().is_file() {
                total += entry
                    .metadata()
                    .map_err(|e| {
                        PackageError::Cache(format!("Failed to get file metadata: {}", e))
                    })?
                    .len();
            }
        }

        Ok(total)
    }

    /// Clear the entire cache
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .map_err(|e| PackageError::Cache(format!("Failed to clear cache: {}", e)))?;
        }
        Ok(())
    }
}

fn is_archive_name(name: &str) -> bool {
    [".tar", ".tgz"]
        .iter()
        .any(|ext| name.len() > ext.len() && name.ends_with(ext))
}
