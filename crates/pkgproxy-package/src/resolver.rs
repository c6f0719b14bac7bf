//! Local package source resolution

use crate::archive::{Archiver, Digests};
use crate::error::{PackageError, Result};
use crate::metadata::{Distribution, PackageDocument};
use crate::overrides::Override;
use semver::Version;
use std::path::{Path, PathBuf};

/// Result of a successful resolution
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// Registry document to answer the metadata request with
    pub document: PackageDocument,
    /// Version found in the local source
    pub version: Version,
    /// Generated archive in the cache directory
    pub archive: PathBuf,
}

/// Resolves overridden packages against their local sources
///
/// Manifests are read on every call; local sources change while developing.
#[derive(Debug, Clone)]
pub struct PackageResolver {
    /// Root of the consuming project (holds its package.json)
    project_root: PathBuf,
    archiver: Archiver,
    /// Prefix for tarball URLs, e.g. `http://127.0.0.1:20001`
    tarball_base: String,
}

impl PackageResolver {
    pub fn new(project_root: impl Into<PathBuf>, archiver: Archiver) -> Self {
        Self {
            project_root: project_root.into(),
            archiver,
            tarball_base: String::new(),
        }
    }

    /// Set the URL prefix under which `/files/{archive}` is served
    pub fn with_tarball_base(mut self, base: impl Into<String>) -> Self {
        self.tarball_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Directory of the local source for `package_name`
    ///
    /// Only the last path segment is used, so `@scope/widget` maps to
    /// `<package root>/widget`.
    pub fn local_dir(&self, rule: &Override, package_name: &str) -> PathBuf {
        let last = package_name.rsplit('/').next().unwrap_or(package_name);
        rule.package_root().join(last)
    }

    /// Resolve `package_name` through `rule`
    ///
    /// Fails when a manifest is missing or malformed, when the project does
    /// not declare the package, when the local version is outside the
    /// declared range (version drift) or when archiving fails.
    pub fn resolve(&self, rule: &Override, package_name: &str) -> Result<ResolvedPackage> {
        let local_dir = self.local_dir(rule, package_name);

        let project = pkgproxy_manifest::from_dir(&self.project_root)?;
        let constraint = project
            .version_range(package_name)
            .ok_or_else(|| PackageError::UndeclaredDependency {
                package: package_name.to_string(),
                project: self.project_root.clone(),
            })??;

        let local = pkgproxy_manifest::from_dir(&local_dir)?;
        let version = local.parsed_version()?;

        if !constraint.matches(&version) {
            return Err(PackageError::VersionDrift {
                package: package_name.to_string(),
                version: version.to_string(),
                constraint: constraint.to_string(),
            });
        }

        let archive = self.archiver.archive(&local_dir, &local)?;
        let digests = Digests::of_file(&archive)?;
        let document = PackageDocument::for_local(&local, self.distribution(&archive, digests));

        Ok(ResolvedPackage {
            document,
            version,
            archive,
        })
    }

    fn distribution(&self, archive: &Path, digests: Digests) -> Distribution {
        let file_name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Distribution {
            integrity: digests.integrity,
            shasum: digests.shasum,
            tarball: format!("{}/files/{}", self.tarball_base, file_name),
        }
    }
}
