//! Loopback service answering for overridden packages

use crate::forward::{package_path, Forwarder};
use crate::ProxyEvent;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pkgproxy_package::{OverrideTable, PackageResolver};
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct InternalState {
    pub overrides: Arc<OverrideTable>,
    pub resolver: Arc<PackageResolver>,
    pub forwarder: Forwarder,
    pub events: broadcast::Sender<ProxyEvent>,
}

/// `GET /files/{archive}` serves tarballs, every other path is a package
pub fn router(state: InternalState) -> Router {
    Router::new()
        .route("/files/:file", get(serve_archive))
        .fallback(serve_metadata)
        .with_state(state)
}

async fn serve_metadata(State(state): State<InternalState>, req: Request) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let package = package_path(req.uri());
    let Some(rule) = state.overrides.matching(&package).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let resolver = state.resolver.clone();
    let (resolve_rule, resolve_name) = (rule.clone(), package.clone());
    let resolved =
        tokio::task::spawn_blocking(move || resolver.resolve(&resolve_rule, &resolve_name)).await;

    let reason = match resolved {
        Ok(Ok(resolved)) => {
            info!(
                "Serving {} {} from {}",
                package,
                resolved.version,
                rule.package_root().display()
            );
            let _ = state.events.send(ProxyEvent::ServedLocal {
                package,
                version: resolved.version.to_string(),
                archive: resolved.archive,
            });
            return Json(resolved.document).into_response();
        }
        Ok(Err(err)) if err.is_version_drift() => {
            info!("{}. Forwarding request to {}", err, rule.upstream());
            err.to_string()
        }
        Ok(Err(err)) => {
            warn!(
                "Cannot serve {} locally ({}). Forwarding request to {}",
                package,
                err,
                rule.upstream()
            );
            err.to_string()
        }
        Err(err) => {
            warn!("Resolving {} panicked: {}", package, err);
            err.to_string()
        }
    };

    let _ = state.events.send(ProxyEvent::Forwarded {
        package,
        upstream: rule.upstream().to_string(),
        reason,
    });
    state.forwarder.forward_or_bad_gateway(rule.upstream(), req).await
}

async fn serve_archive(State(state): State<InternalState>, Path(file): Path<String>) -> Response {
    let Some(path) = state.resolver.archiver().cache().path_for(&file) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(err) => {
            warn!("Failed to open {}: {}", path.display(), err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Length comes from the opened file; a regenerated archive is renamed
    // over the path and does not affect this handle.
    let length = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!("Failed to stat {}: {}", path.display(), err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
