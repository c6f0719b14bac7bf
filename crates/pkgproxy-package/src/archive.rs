//! Packing local sources into registry tarballs

use crate::cache::ArchiveCache;
use crate::error::{PackageError, Result};
use crate::DEFAULT_EXCLUDES;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use pkgproxy_manifest::PackageJson;
use sha2::{Digest, Sha512};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};

/// Directory every entry is stored under, as npm expects when unpacking
const ENTRY_PREFIX: &str = "package";

/// Archive compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Plain tar (`.tar`)
    #[default]
    None,
    /// Gzip-compressed tar (`.tgz`)
    Gzip,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tgz",
        }
    }
}

/// Cache key for a package version, safe to use as a URL path segment
///
/// `@` is dropped and every other character outside `[A-Za-z0-9-]` becomes
/// `_`, so `@acme/ui` at `1.0.0` yields `acme_ui_1_0_0`.
pub fn sanitize_key(name: &str, version: &str) -> String {
    format!("{}_{}", name.replace('@', ""), version)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File name of the archive generated for a package version
pub fn archive_file_name(name: &str, version: &str, compression: Compression) -> String {
    format!("{}.{}", sanitize_key(name, version), compression.extension())
}

/// Digests of a generated archive
///
/// Both fields derive from one SHA-512 digest of the archive bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    /// `sha512-<base64>` for the registry `integrity` field
    pub integrity: String,
    /// Hex encoding of the same digest for the `shasum` field
    pub shasum: String,
}

impl Digests {
    /// Hash an archive on disk
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha512::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self::from_digest(&hasher.finalize()))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(&Sha512::digest(bytes))
    }

    fn from_digest(digest: &[u8]) -> Self {
        Self {
            integrity: format!("sha512-{}", STANDARD.encode(digest)),
            shasum: hex::encode(digest),
        }
    }
}

/// Packs package source directories into the archive cache
#[derive(Debug, Clone)]
pub struct Archiver {
    cache: ArchiveCache,
    compression: Compression,
    excludes: Vec<String>,
}

impl Archiver {
    /// Archiver writing uncompressed tarballs into `cache`
    pub fn new(cache: ArchiveCache) -> Self {
        Self {
            cache,
            compression: Compression::None,
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the excluded directory names
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = excludes.into_iter().map(Into::into).collect();
        self
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    /// Pack `source_dir` and return the path of the archive
    ///
    /// The archive is written to a temporary file in the cache directory and
    /// renamed into place, so concurrent readers never see a partial file.
    pub fn archive(&self, source_dir: &Path, descriptor: &PackageJson) -> Result<PathBuf> {
        if !source_dir.is_dir() {
            return Err(PackageError::Archive(format!(
                "Source directory {} does not exist",
                source_dir.display()
            )));
        }

        self.cache.ensure()?;
        let file_name = archive_file_name(&descriptor.name, &descriptor.version, self.compression);
        let dest = self.cache.root().join(file_name);

        let mut temp = NamedTempFile::new_in(self.cache.root())?;
        match self.compression {
            Compression::None => {
                let mut writer = self.write_tar(source_dir, BufWriter::new(temp.as_file_mut()))?;
                writer.flush()?;
            }
            Compression::Gzip => {
                let encoder = GzEncoder::new(
                    BufWriter::new(temp.as_file_mut()),
                    flate2::Compression::default(),
                );
                let mut writer = self.write_tar(source_dir, encoder)?.finish()?;
                writer.flush()?;
            }
        }
        temp.as_file().sync_all()?;
        temp.persist(&dest)?;

        tracing::debug!("Archived {} into {}", source_dir.display(), dest.display());
        Ok(dest)
    }

    /// Regular files that belong in the archive, relative to `source_dir`
    pub fn collect_files(&self, source_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source_dir)
                .map_err(|e| PackageError::Archive(e.to_string()))?;
            files.push(relative.to_path_buf());
        }

        Ok(files)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.excludes.iter().any(|e| e == name))
    }

    fn write_tar<W: Write>(&self, source_dir: &Path, writer: W) -> Result<W> {
        let mut builder = tar::Builder::new(writer);
        builder.mode(tar::HeaderMode::Deterministic);

        for relative in self.collect_files(source_dir)? {
            let name = Path::new(ENTRY_PREFIX).join(&relative);
            builder
                .append_path_with_name(source_dir.join(&relative), &name)
                .map_err(|e| {
                    PackageError::Archive(format!("Failed to add {}: {}", relative.display(), e))
                })?;
        }

        builder
            .into_inner()
            .map_err(|e| PackageError::Archive(format!("Failed to finish archive: {}", e)))
    }
}
