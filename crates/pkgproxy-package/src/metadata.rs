//! Registry documents synthesized for local packages

use pkgproxy_manifest::{PackageJson, Person, Repository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Package document as served by `GET /{package}`
///
/// Mirrors the shape of an npm registry packument, restricted to a single
/// version: the one found in the local source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "dist-tags")]
    pub dist_tags: DistTags,

    pub versions: BTreeMap<String, VersionDocument>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistTags {
    pub latest: String,
}

/// One entry of the `versions` map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDocument {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    pub dist: Distribution,
}

/// Download record of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Subresource-integrity string, e.g. `sha512-…`
    pub integrity: String,
    /// Hex digest of the tarball
    pub shasum: String,
    /// Where the installer downloads the tarball from
    pub tarball: String,
}

impl PackageDocument {
    /// Build the single-version document for a local descriptor
    pub fn for_local(descriptor: &PackageJson, dist: Distribution) -> Self {
        let version = VersionDocument {
            id: format!("{}@{}", descriptor.name, descriptor.version),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
            license: descriptor.license.clone(),
            dependencies: descriptor.dependencies.clone(),
            peer_dependencies: descriptor.peer_dependencies.clone(),
            dist,
        };

        let mut versions = BTreeMap::new();
        versions.insert(descriptor.version.clone(), version);

        Self {
            id: descriptor.name.clone(),
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            dist_tags: DistTags {
                latest: descriptor.version.clone(),
            },
            versions,
            readme: descriptor.readme.clone(),
            repository: descriptor.repository.clone(),
            author: descriptor.author.clone(),
            license: descriptor.license.clone(),
        }
    }

    /// The only version in the document
    pub fn latest(&self) -> Option<&VersionDocument> {
        self.versions.get(&self.dist_tags.latest)
    }
}
