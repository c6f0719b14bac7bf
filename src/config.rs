//! `pkgproxy.toml` loading and validation

use anyhow::{bail, Context, Result};
use pkgproxy_package::{Compression, Override, OverrideTable};
use pkgproxy_server::{
    ListenPort, Proxy, DEFAULT_PREVIEW_LIMIT, DEFAULT_REGISTRY, DEFAULT_SHUTDOWN_GRACE,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "pkgproxy.toml";

/// Ports searched when the config does not pin one
const EXTERNAL_PORTS: std::ops::RangeInclusive<u16> = 10000..=20000;
const INTERNAL_PORTS: std::ops::RangeInclusive<u16> = 20001..=30000;

/// Raw file contents
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    proxy: ProxySection,
    #[serde(default)]
    overrides: Vec<OverrideEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProxySection {
    port: Option<u16>,
    internal_port: Option<u16>,
    default_registry: Option<String>,
    cache_dir: Option<String>,
    shutdown_grace_secs: Option<u64>,
    preview_limit: Option<usize>,
    #[serde(default)]
    compress: bool,
    #[serde(default = "default_true")]
    write_npmrc: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            port: None,
            internal_port: None,
            default_registry: None,
            cache_dir: None,
            shutdown_grace_secs: None,
            preview_limit: None,
            compress: false,
            write_npmrc: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideEntry {
    namespace: String,
    upstream: String,
    package_root: String,
}

/// Validated settings with every path made absolute
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the config file and the project's `package.json`
    pub project_root: PathBuf,
    pub overrides: OverrideTable,
    pub port: ListenPort,
    pub internal_port: ListenPort,
    pub default_registry: String,
    pub cache_dir: PathBuf,
    pub compression: Compression,
    pub shutdown_grace: Duration,
    /// Bytes of each forwarded response logged at debug level
    pub preview_limit: usize,
    pub write_npmrc: bool,
}

impl Settings {
    /// Load and validate the config file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let project_root = if base.is_absolute() {
            base
        } else {
            std::env::current_dir()?.join(base)
        };

        Self::parse(&contents, &project_root)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse config `contents`, resolving relative paths against `project_root`
    pub fn parse(contents: &str, project_root: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;

        if file.overrides.is_empty() {
            bail!("No overrides configured; add at least one [[overrides]] table");
        }

        let mut overrides = Vec::with_capacity(file.overrides.len());
        for entry in file.overrides {
            let root = expand_path(&entry.package_root, project_root)?;
            overrides.push(Override::new(entry.namespace, &entry.upstream, root)?);
        }

        let default_registry = file
            .proxy
            .default_registry
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string())
            .trim_end_matches('/')
            .to_string();
        let registry = Url::parse(&default_registry)
            .with_context(|| format!("Invalid default registry '{}'", default_registry))?;
        if !matches!(registry.scheme(), "http" | "https") {
            bail!("Default registry must be an http(s) URL, got '{}'", default_registry);
        }

        let cache_dir = match file.proxy.cache_dir {
            Some(dir) => expand_path(&dir, project_root)?,
            None => pkgproxy_package::default_cache_dir(),
        };

        Ok(Self {
            project_root: project_root.to_path_buf(),
            overrides: OverrideTable::new(overrides),
            port: listen_port(file.proxy.port, EXTERNAL_PORTS),
            internal_port: listen_port(file.proxy.internal_port, INTERNAL_PORTS),
            default_registry,
            cache_dir,
            compression: if file.proxy.compress {
                Compression::Gzip
            } else {
                Compression::None
            },
            shutdown_grace: file
                .proxy
                .shutdown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            preview_limit: file.proxy.preview_limit.unwrap_or(DEFAULT_PREVIEW_LIMIT),
            write_npmrc: file.proxy.write_npmrc,
        })
    }

    /// Build a proxy configured from these settings
    pub fn proxy(&self) -> Proxy {
        Proxy::new(self.overrides.clone(), &self.project_root)
            .with_port(self.port.clone())
            .with_internal_port(self.internal_port.clone())
            .with_default_registry(&self.default_registry)
            .with_cache_dir(&self.cache_dir)
            .with_compression(self.compression)
            .with_shutdown_grace(self.shutdown_grace)
            .with_preview_limit(self.preview_limit)
    }
}

fn listen_port(port: Option<u16>, search: std::ops::RangeInclusive<u16>) -> ListenPort {
    match port {
        Some(port) => ListenPort::Fixed(port),
        None => ListenPort::FirstFree(search),
    }
}

/// Expand a leading `~` and make `raw` absolute relative to `base`
fn expand_path(raw: &str, base: &Path) -> Result<PathBuf> {
    let path = if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir().context("Cannot expand '~': no home directory")?;
        home.join(raw.trim_start_matches('~').trim_start_matches('/'))
    } else {
        PathBuf::from(raw)
    };

    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        [[overrides]]
        namespace = "@acme"
        upstream = "https://npm.acme.dev/"
        package_root = "../acme-pkgs"
    "#;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse(MINIMAL, Path::new("/work/app")).unwrap();

        assert_eq!(settings.port, ListenPort::FirstFree(EXTERNAL_PORTS));
        assert_eq!(settings.internal_port, ListenPort::FirstFree(INTERNAL_PORTS));
        assert_eq!(settings.default_registry, DEFAULT_REGISTRY);
        assert_eq!(settings.compression, Compression::None);
        assert_eq!(settings.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(settings.preview_limit, DEFAULT_PREVIEW_LIMIT);
        assert!(settings.write_npmrc);

        let rule = settings.overrides.iter().next().unwrap();
        assert_eq!(rule.upstream(), "https://npm.acme.dev");
        assert_eq!(rule.package_root(), Path::new("/work/app/../acme-pkgs"));
    }

    #[test]
    fn test_full_config() {
        let contents = r#"
            [proxy]
            port = 4873
            internal_port = 4874
            default_registry = "https://mirror.example.com/"
            cache_dir = "/var/cache/pkgproxy"
            shutdown_grace_secs = 1
            preview_limit = 256
            compress = true
            write_npmrc = false

            [[overrides]]
            namespace = "@acme"
            upstream = "https://npm.acme.dev"
            package_root = "/src/acme"

            [[overrides]]
            namespace = "@tools"
            upstream = "https://registry.npmjs.org"
            package_root = "tools"
        "#;
        let settings = Settings::parse(contents, Path::new("/work/app")).unwrap();

        assert_eq!(settings.port, ListenPort::Fixed(4873));
        assert_eq!(settings.internal_port, ListenPort::Fixed(4874));
        assert_eq!(settings.default_registry, "https://mirror.example.com");
        assert_eq!(settings.cache_dir, PathBuf::from("/var/cache/pkgproxy"));
        assert_eq!(settings.compression, Compression::Gzip);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(1));
        assert_eq!(settings.preview_limit, 256);
        assert!(!settings.write_npmrc);

        let roots: Vec<&Path> = settings.overrides.iter().map(|r| r.package_root()).collect();
        assert_eq!(roots, [Path::new("/src/acme"), Path::new("/work/app/tools")]);
    }

    #[test]
    fn test_home_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(
            expand_path("~/pkgs", Path::new("/work")).unwrap(),
            home.join("pkgs")
        );
        assert_eq!(expand_path("~", Path::new("/work")).unwrap(), home);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(Settings::parse("", Path::new("/work")).is_err());

        let bad_upstream = MINIMAL.replace("https://npm.acme.dev/", "ftp://npm.acme.dev");
        assert!(Settings::parse(&bad_upstream, Path::new("/work")).is_err());

        let empty_namespace = MINIMAL.replace("\"@acme\"", "\"\"");
        assert!(Settings::parse(&empty_namespace, Path::new("/work")).is_err());

        let bad_registry = format!("[proxy]\ndefault_registry = \"not a url\"\n{}", MINIMAL);
        assert!(Settings::parse(&bad_registry, Path::new("/work")).is_err());

        let unknown_key = format!("[proxy]\nprot = 1\n{}", MINIMAL);
        assert!(Settings::parse(&unknown_key, Path::new("/work")).is_err());
    }

    #[test]
    fn test_load_resolves_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, MINIMAL).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.project_root, temp.path());

        let missing = Settings::load(&temp.path().join("missing.toml"));
        assert!(missing.is_err());
    }
}
