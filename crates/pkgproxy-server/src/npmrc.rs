//! Generated `.npmrc` that points overridden namespaces at the proxy

use crate::error::{ProxyError, Result};
use pkgproxy_package::OverrideTable;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const NPMRC_FILE: &str = ".npmrc";

const BANNER: [&str; 4] = [
    ";CREATED BY PKGPROXY. DO NOT EDIT.",
    ";This file is written when the proxy starts and removed when it stops.",
    ";Registry settings for the listed namespaces point at the local proxy.",
    ";Remove the file by hand if the proxy did not shut down cleanly.",
];

/// A `.npmrc` written for the lifetime of a running proxy
///
/// The file is removed again when the value is dropped.
#[derive(Debug)]
pub struct NpmrcFile {
    path: PathBuf,
}

impl NpmrcFile {
    /// Render the file contents for `namespaces` served at `addr`
    pub fn render<'a, I>(namespaces: I, addr: SocketAddr) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = String::new();
        for line in BANNER {
            out.push_str(line);
            out.push('\n');
        }

        let mut seen: Vec<&str> = Vec::new();
        for namespace in namespaces {
            if seen.contains(&namespace) {
                continue;
            }
            seen.push(namespace);
            out.push_str(&format!("{}:registry=http://{}\n", namespace, addr));
        }
        out
    }

    /// Write `.npmrc` into `project_root`
    ///
    /// An existing file is only replaced when it carries our banner, so a
    /// stale file from an earlier run is fine but a user's own is not.
    pub fn write(project_root: &Path, overrides: &OverrideTable, addr: SocketAddr) -> Result<Self> {
        let path = project_root.join(NPMRC_FILE);

        match fs::read_to_string(&path) {
            Ok(existing) => {
                if !existing.starts_with(BANNER[0]) {
                    return Err(ProxyError::ForeignNpmrc(path));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let contents = Self::render(overrides.iter().map(|rule| rule.namespace()), addr);
        fs::write(&path, contents)?;
        debug!("Wrote {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NpmrcFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgproxy_package::Override;
    use tempfile::TempDir;

    fn addr() -> SocketAddr {
        "127.0.0.1:1234".parse().unwrap()
    }

    fn table() -> OverrideTable {
        OverrideTable::new(vec![
            Override::new("@acme", "https://npm.acme.dev", "/src/acme").unwrap(),
            Override::new("@tools", "https://registry.npmjs.org", "/src/tools").unwrap(),
            Override::new("@acme", "https://mirror.acme.dev", "/src/other").unwrap(),
        ])
    }

    #[test]
    fn test_render_lists_each_namespace_once() {
        let rendered = NpmrcFile::render(["@acme", "@tools", "@acme"], addr());
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[..4].iter().all(|line| line.starts_with(';')));
        assert_eq!(lines[4], "@acme:registry=http://127.0.0.1:1234");
        assert_eq!(lines[5], "@tools:registry=http://127.0.0.1:1234");
    }

    #[test]
    fn test_written_file_is_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let npmrc = NpmrcFile::write(temp.path(), &table(), addr()).unwrap();
        let path = npmrc.path().to_path_buf();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("@acme:registry=http://127.0.0.1:1234"));
        assert!(contents.contains("@tools:registry=http://127.0.0.1:1234"));

        drop(npmrc);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_generated_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let stale = NpmrcFile::render(["@old"], addr());
        fs::write(temp.path().join(NPMRC_FILE), stale).unwrap();

        let npmrc = NpmrcFile::write(temp.path(), &table(), addr()).unwrap();
        let contents = fs::read_to_string(npmrc.path()).unwrap();
        assert!(!contents.contains("@old"));
    }

    #[test]
    fn test_foreign_file_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(NPMRC_FILE);
        fs::write(&path, "registry=https://registry.example.com\n").unwrap();

        let result = NpmrcFile::write(temp.path(), &table(), addr());
        assert!(matches!(result, Err(ProxyError::ForeignNpmrc(_))));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "registry=https://registry.example.com\n"
        );
    }
}
