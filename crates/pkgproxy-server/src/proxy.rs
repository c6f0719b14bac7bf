//! Proxy orchestration and lifecycle

use crate::error::{ProxyError, Result};
use crate::external::{self, ExternalState};
use crate::forward::{Forwarder, DEFAULT_PREVIEW_LIMIT};
use crate::internal::{self, InternalState};
use crate::shutdown::{self, Shutdown, ShutdownSignal};
use crate::ProxyEvent;
use pkgproxy_package::{ArchiveCache, Archiver, Compression, OverrideTable, PackageResolver};
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

/// Registry that receives every request not covered by an override
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Time in-flight requests get to finish once shutdown is triggered
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How a service picks its port; both services bind to loopback only
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenPort {
    /// Bind exactly this port (`0` lets the OS choose)
    Fixed(u16),
    /// Bind the first port of the range that is free
    FirstFree(RangeInclusive<u16>),
}

impl ListenPort {
    async fn bind(&self) -> Result<TcpListener> {
        match self {
            ListenPort::Fixed(port) => {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, *port));
                TcpListener::bind(addr)
                    .await
                    .map_err(|source| ProxyError::Bind { addr, source })
            }
            ListenPort::FirstFree(range) => {
                for port in range.clone() {
                    if let Ok(listener) = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                        return Ok(listener);
                    }
                }
                Err(ProxyError::NoFreePort {
                    from: *range.start(),
                    to: *range.end(),
                })
            }
        }
    }
}

/// Local registry proxy made of an external and an internal service
///
/// Holds no mutable per-request state; the override table is shared
/// read-only between both services.
pub struct Proxy {
    overrides: Arc<OverrideTable>,
    project_root: PathBuf,
    port: ListenPort,
    internal_port: ListenPort,
    default_registry: String,
    cache_dir: PathBuf,
    compression: Compression,
    shutdown_grace: Duration,
    preview_limit: usize,
    events: broadcast::Sender<ProxyEvent>,
}

impl Proxy {
    /// Create a proxy for `overrides` serving the project at `project_root`
    pub fn new(overrides: OverrideTable, project_root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            overrides: Arc::new(overrides),
            project_root: project_root.into(),
            port: ListenPort::Fixed(1234),
            internal_port: ListenPort::Fixed(1235),
            default_registry: DEFAULT_REGISTRY.to_string(),
            cache_dir: pkgproxy_package::default_cache_dir(),
            compression: Compression::None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            events,
        }
    }

    pub fn with_port(mut self, port: ListenPort) -> Self {
        self.port = port;
        self
    }

    pub fn with_internal_port(mut self, port: ListenPort) -> Self {
        self.internal_port = port;
        self
    }

    /// Set the fallback registry; a trailing slash is trimmed
    pub fn with_default_registry(mut self, registry: impl AsRef<str>) -> Self {
        self.default_registry = registry.as_ref().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bytes of each forwarded response kept for debug logging
    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn default_registry(&self) -> &str {
        &self.default_registry
    }

    /// Receive [`ProxyEvent`]s published while the proxy runs
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Run both services until `signal` fires
    ///
    /// The internal service runs in the background; the external service
    /// runs on the calling task and this returns once its listener closed.
    pub async fn start(self, signal: ShutdownSignal) -> Result<()> {
        self.bind().await?.run(signal).await
    }

    /// Bind both services and run them in the background
    pub async fn spawn(self) -> Result<ProxyHandle> {
        let bound = self.bind().await?;
        let external_addr = bound.external.local_addr()?;
        let internal_addr = bound.internal.local_addr()?;
        let events = bound.proxy.events.clone();

        let (shutdown, signal) = Shutdown::new();
        let task = tokio::spawn(bound.run(signal));

        Ok(ProxyHandle {
            external_addr,
            internal_addr,
            shutdown,
            events,
            task,
        })
    }

    async fn bind(self) -> Result<BoundProxy> {
        let parsed = Url::parse(&self.default_registry).map_err(|e| {
            ProxyError::InvalidRegistry(self.default_registry.clone(), e.to_string())
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidRegistry(
                self.default_registry.clone(),
                "expected an http(s) URL".to_string(),
            ));
        }

        let external = self.port.bind().await?;
        let internal = self.internal_port.bind().await?;
        Ok(BoundProxy {
            proxy: self,
            external,
            internal,
        })
    }
}

/// A proxy whose listeners are bound but not yet serving
struct BoundProxy {
    proxy: Proxy,
    external: TcpListener,
    internal: TcpListener,
}

impl BoundProxy {
    async fn run(self, signal: ShutdownSignal) -> Result<()> {
        let BoundProxy {
            proxy,
            external,
            internal,
        } = self;

        let external_addr = external.local_addr()?;
        let internal_url = format!("http://{}", internal.local_addr()?);
        let forwarder = Forwarder::new(proxy.preview_limit)?;

        let archiver = Archiver::new(ArchiveCache::new(&proxy.cache_dir))
            .with_compression(proxy.compression);
        let resolver =
            PackageResolver::new(&proxy.project_root, archiver).with_tarball_base(&internal_url);

        let internal_router = internal::router(InternalState {
            overrides: proxy.overrides.clone(),
            resolver: Arc::new(resolver),
            forwarder: forwarder.clone(),
            events: proxy.events.clone(),
        });
        let external_router = external::router(ExternalState {
            overrides: proxy.overrides.clone(),
            default_registry: Arc::from(proxy.default_registry.as_str()),
            internal_url: Arc::from(internal_url.as_str()),
            forwarder,
        });

        info!(
            "Proxy listening on http://{} (internal {}), {} override(s), default registry {}",
            external_addr,
            internal_url,
            proxy.overrides.len(),
            proxy.default_registry
        );

        let grace = proxy.shutdown_grace;
        let internal_task = tokio::spawn(shutdown::serve(
            "internal",
            internal,
            internal_router,
            signal.clone(),
            grace,
        ));

        let external_result =
            shutdown::serve("external", external, external_router, signal, grace).await;
        if let Err(err) = external_result {
            internal_task.abort();
            return Err(err);
        }

        internal_task.await?
    }
}

/// Running proxy started with [`Proxy::spawn`]
pub struct ProxyHandle {
    external_addr: SocketAddr,
    internal_addr: SocketAddr,
    shutdown: Shutdown,
    events: broadcast::Sender<ProxyEvent>,
    task: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    /// Address the package manager should use as its registry
    pub fn external_addr(&self) -> SocketAddr {
        self.external_addr
    }

    pub fn internal_addr(&self) -> SocketAddr {
        self.internal_addr
    }

    pub fn external_url(&self) -> String {
        format!("http://{}", self.external_addr)
    }

    pub fn internal_url(&self) -> String {
        format!("http://{}", self.internal_addr)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// A signal that fires when this proxy is stopped
    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Trigger shutdown and wait for both services to finish
    pub async fn stop(self) -> Result<()> {
        self.shutdown.trigger();
        self.task.await?
    }
}
