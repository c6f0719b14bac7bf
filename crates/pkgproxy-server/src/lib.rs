//! HTTP services of the pkgproxy registry proxy
//!
//! Two services cooperate. The external service is the registry address the
//! package manager is configured with; it forwards every request either to
//! the real registry or, for overridden namespaces, to the internal service.
//! The internal service listens on loopback only, answers metadata requests
//! for overridden packages from their local sources and serves the
//! generated tarballs.

pub mod error;
pub mod external;
pub mod forward;
pub mod internal;
pub mod npmrc;
pub mod proxy;
pub mod shutdown;

pub use error::{ProxyError, Result};
pub use forward::{package_path, Forwarder, DEFAULT_PREVIEW_LIMIT};
pub use npmrc::NpmrcFile;
pub use proxy::{ListenPort, Proxy, ProxyHandle, DEFAULT_REGISTRY, DEFAULT_SHUTDOWN_GRACE};
pub use shutdown::{Shutdown, ShutdownSignal};

use std::path::PathBuf;

/// Notifications published by a running proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// A metadata request was answered from a local source
    ServedLocal {
        package: String,
        version: String,
        archive: PathBuf,
    },
    /// An overridden package fell back to its upstream registry
    Forwarded {
        package: String,
        upstream: String,
        reason: String,
    },
}
