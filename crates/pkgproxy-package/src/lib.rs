//! Local package serving for pkgproxy
//!
//! This crate decides which requests are overridden, reconciles a local
//! source's version with the consuming project's declared range, packs the
//! source into a tarball and synthesizes the registry document that points
//! at it.

pub mod archive;
pub mod cache;
pub mod error;
pub mod metadata;
pub mod overrides;
pub mod resolver;

pub use archive::{archive_file_name, sanitize_key, Archiver, Compression, Digests};
pub use cache::ArchiveCache;
pub use error::{PackageError, Result};
pub use metadata::{DistTags, Distribution, PackageDocument, VersionDocument};
pub use overrides::{Override, OverrideTable};
pub use resolver::{PackageResolver, ResolvedPackage};

use std::path::PathBuf;

/// Directory names never packed into an archive
pub const DEFAULT_EXCLUDES: [&str; 2] = ["node_modules", ".git"];

/// Default location of generated archives
///
/// Uses the per-user cache directory and falls back to a directory relative
/// to the working directory when none can be determined.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("pkgproxy").join("archives"))
        .unwrap_or_else(|| PathBuf::from(".pkgproxy-cache"))
}
