//! package.json structure definitions

use crate::error::{ManifestError, Result};
use crate::range::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of an npm package manifest
pub const MANIFEST_FILE: &str = "package.json";

/// The subset of `package.json` that pkgproxy reads
///
/// Only `name`, `version` and the dependency maps take part in resolution;
/// the descriptive fields are carried into the synthesized registry document
/// when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    /// Package name, possibly scoped (`@scope/name`)
    #[serde(default)]
    pub name: String,

    /// Version string as written in the manifest
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// License identifier (SPDX)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    /// Runtime dependencies
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Development dependencies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
}

/// `author` may be written as `"Name <mail> (url)"` or as an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Person {
    Text(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

/// `repository` may be a shorthand string or a `{ type, url }` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Repository {
    Text(String),
    Detailed {
        #[serde(rename = "type", default)]
        kind: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<String>,
    },
}

impl PackageJson {
    /// Parse the manifest's `version` field
    pub fn parsed_version(&self) -> Result<semver::Version> {
        let raw = self.version.trim();
        let stripped = raw.strip_prefix('v').unwrap_or(raw);
        semver::Version::parse(stripped)
            .map_err(|e| ManifestError::InvalidVersion(self.version.clone(), e.to_string()))
    }

    /// Range string declared for `name`
    ///
    /// Looks at `dependencies`, then `devDependencies`, then
    /// `optionalDependencies`.
    pub fn declared_range(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
            .or_else(|| self.optional_dependencies.get(name))
            .map(String::as_str)
    }

    /// Parsed version range declared for `name`, if it is declared at all
    pub fn version_range(&self, name: &str) -> Option<Result<VersionRange>> {
        self.declared_range(name).map(VersionRange::parse)
    }
}
