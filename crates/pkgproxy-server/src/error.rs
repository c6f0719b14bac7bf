//! Error types for the proxy services

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No free port in {from}..={to}")]
    NoFreePort { from: u16, to: u16 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid registry URL '{0}': {1}")]
    InvalidRegistry(String, String),

    #[error("Request to {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("{service} service failed: {source}")]
    Serve {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Service task failed: {0}")]
    Join(String),

    #[error("Refusing to overwrite {}: it was not generated by pkgproxy", .0.display())]
    ForeignNpmrc(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for ProxyError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProxyError::Join(err.to_string())
    }
}
