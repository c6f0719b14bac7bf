//! Public entry point the package manager talks to

use crate::forward::{package_path, Forwarder};
use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use pkgproxy_package::OverrideTable;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ExternalState {
    pub overrides: Arc<OverrideTable>,
    /// Registry for everything not overridden
    pub default_registry: Arc<str>,
    /// Base URL of the internal service
    pub internal_url: Arc<str>,
    pub forwarder: Forwarder,
}

pub fn router(state: ExternalState) -> Router {
    Router::new().fallback(route_request).with_state(state)
}

/// Forward to the internal service for overridden namespaces, else upstream
async fn route_request(State(state): State<ExternalState>, req: Request) -> Response {
    let package = package_path(req.uri());
    info!("Incoming request for {}", package);

    let target = match state.overrides.matching(&package) {
        Some(rule) => {
            debug!("{} matches override {}", package, rule.namespace());
            &state.internal_url
        }
        None => &state.default_registry,
    };

    state.forwarder.forward_or_bad_gateway(target, req).await
}
