//! Override rules and first-match lookup

use crate::error::{PackageError, Result};
use std::path::{Path, PathBuf};
use url::Url;

/// Routes a package namespace to a local source root
///
/// Immutable once constructed; the upstream URL is validated and stored
/// without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    namespace: String,
    upstream: String,
    package_root: PathBuf,
}

impl Override {
    /// Create a validated override rule
    pub fn new(
        namespace: impl Into<String>,
        upstream: impl AsRef<str>,
        package_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(PackageError::InvalidOverride(
                "Namespace cannot be empty".to_string(),
            ));
        }

        let upstream = upstream.as_ref().trim_end_matches('/');
        let parsed = Url::parse(upstream).map_err(|e| {
            PackageError::InvalidOverride(format!("Upstream '{}' for {}: {}", upstream, namespace, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PackageError::InvalidOverride(format!(
                "Upstream for {} must be an http(s) URL, got '{}'",
                namespace, upstream
            )));
        }

        let package_root = package_root.into();
        if package_root.as_os_str().is_empty() {
            return Err(PackageError::InvalidOverride(format!(
                "Package root for {} cannot be empty",
                namespace
            )));
        }

        Ok(Self {
            namespace,
            upstream: upstream.to_string(),
            package_root,
        })
    }

    /// Prefix a package path must start with to match
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registry used when the local source cannot be served
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Directory holding one sub-directory per local package
    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.namespace)
    }
}

/// Ordered list of overrides, read-only after construction
///
/// Lookup is first-match-wins, so more specific namespaces must come first
/// when prefixes overlap.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    overrides: Vec<Override>,
}

impl OverrideTable {
    pub fn new(overrides: Vec<Override>) -> Self {
        Self { overrides }
    }

    /// First override whose namespace prefixes `path`
    ///
    /// `path` must already be stripped of its leading slash.
    pub fn matching(&self, path: &str) -> Option<&Override> {
        self.overrides.iter().find(|o| o.matches(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Override> {
        self.overrides.iter()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl FromIterator<Override> for OverrideTable {
    fn from_iter<I: IntoIterator<Item = Override>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(namespace: &str, root: &str) -> Override {
        Override::new(namespace, "https://registry.example.com/", root).unwrap()
    }

    #[test]
    fn test_override_trims_upstream() {
        let o = rule("@acme", "/src/acme-pkgs");
        assert_eq!(o.upstream(), "https://registry.example.com");
        assert_eq!(o.package_root(), Path::new("/src/acme-pkgs"));
    }

    #[test]
    fn test_invalid_overrides() {
        assert!(Override::new("", "https://r.example.com", "/src").is_err());
        assert!(Override::new("@acme", "not a url", "/src").is_err());
        assert!(Override::new("@acme", "ftp://r.example.com", "/src").is_err());
        assert!(Override::new("@acme", "https://r.example.com", "").is_err());
    }

    #[test]
    fn test_matching_prefix() {
        let table = OverrideTable::new(vec![rule("@acme", "/a"), rule("@other", "/b")]);

        assert_eq!(table.matching("@acme/ui").unwrap().package_root(), Path::new("/a"));
        assert_eq!(table.matching("@other/x").unwrap().package_root(), Path::new("/b"));
        assert!(table.matching("lodash").is_none());
        assert!(table.matching("/@acme/ui").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let specific_first =
            OverrideTable::new(vec![rule("@acme/ui", "/specific"), rule("@acme", "/general")]);
        assert_eq!(
            specific_first.matching("@acme/ui-kit").unwrap().package_root(),
            Path::new("/specific")
        );
        assert_eq!(
            specific_first.matching("@acme/core").unwrap().package_root(),
            Path::new("/general")
        );

        let general_first =
            OverrideTable::new(vec![rule("@acme", "/general"), rule("@acme/ui", "/specific")]);
        assert_eq!(
            general_first.matching("@acme/ui-kit").unwrap().package_root(),
            Path::new("/general")
        );
    }

    #[test]
    fn test_empty_table() {
        let table = OverrideTable::default();
        assert!(table.is_empty());
        assert!(table.matching("@acme/ui").is_none());
    }
}
