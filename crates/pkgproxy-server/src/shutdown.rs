//! Shared cancellation and bounded graceful shutdown

use crate::error::{ProxyError, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Trigger side of the proxy's cancellation signal
///
/// Dropping every `Shutdown` also cancels the signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

/// Cancellation signal observed by both services
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, ShutdownSignal { rx })
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered
    pub async fn cancelled(&mut self) {
        // An error means the sender is gone, which counts as cancellation.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Time connections get to close once in-flight requests were cut off
const ABORT_WAIT: Duration = Duration::from_secs(1);

/// Serve `router` until `signal` fires, then drain for at most `grace`
///
/// Requests still running when the grace period expires are answered with
/// 503, and responses still streaming are cut off, so every connection
/// closes before this returns. A connection that stays open even then (a
/// client stuck sending its request) is logged and left to the OS once the
/// listener is gone.
pub(crate) async fn serve(
    service: &'static str,
    listener: TcpListener,
    router: Router,
    signal: ShutdownSignal,
    grace: Duration,
) -> Result<()> {
    let (abort, abort_signal) = Shutdown::new();
    let router = router.layer(middleware::from_fn_with_state(abort_signal, cut_off));

    let mut drain = signal.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { drain.cancelled().await })
        .into_future();
    tokio::pin!(server);

    let mut signal = signal;
    tokio::select! {
        result = &mut server => {
            return result.map_err(|source| ProxyError::Serve { service, source });
        }
        _ = signal.cancelled() => {}
    }

    if let Ok(result) = tokio::time::timeout(grace, &mut server).await {
        info!("Stopped {} service", service);
        return result.map_err(|source| ProxyError::Serve { service, source });
    }

    warn!(
        "{} service did not drain within {:?}, aborting in-flight requests",
        service, grace
    );
    abort.trigger();

    match tokio::time::timeout(ABORT_WAIT, server).await {
        Ok(result) => result.map_err(|source| ProxyError::Serve { service, source }),
        Err(_) => {
            warn!(
                "{} service still has open connections, closing listener",
                service
            );
            Ok(())
        }
    }
}

/// Ends the request, or the response body it is streaming, once `abort` fires
async fn cut_off(State(mut abort): State<ShutdownSignal>, req: Request, next: Next) -> Response {
    let mut body_abort = abort.clone();

    let response = tokio::select! {
        response = next.run(req) => response,
        _ = abort.cancelled() => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Proxy is shutting down\n").into_response();
        }
    };

    let (parts, body) = response.into_parts();
    let body = body
        .into_data_stream()
        .take_until(async move { body_abort.cancelled().await });
    Response::from_parts(parts, Body::from_stream(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Instant;

    #[tokio::test]
    async fn test_trigger_reaches_every_signal() {
        let (shutdown, mut first) = Shutdown::new();
        let mut second = shutdown.signal();
        assert!(!first.is_cancelled());

        shutdown.trigger();
        first.cancelled().await;
        second.cancelled().await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropping_shutdown_cancels() {
        let (shutdown, mut signal) = Shutdown::new();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_on_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown, signal) = Shutdown::new();
        let task = tokio::spawn(serve(
            "test",
            listener,
            Router::new(),
            signal,
            Duration::from_secs(1),
        ));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_requests_outliving_grace_are_cut_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );

        let (shutdown, signal) = Shutdown::new();
        let task = tokio::spawn(serve(
            "test",
            listener,
            router,
            signal,
            Duration::from_millis(200),
        ));
        let client =
            tokio::spawn(async move { reqwest::get(format!("http://{}/slow", addr)).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let response = tokio::time::timeout(Duration::from_secs(1), client)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_streaming_response_is_cut_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route(
            "/stream",
            get(|| async {
                let chunks = futures::stream::once(async {
                    Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"first"))
                })
                .chain(futures::stream::pending());
                Body::from_stream(chunks)
            }),
        );

        let (shutdown, signal) = Shutdown::new();
        let task = tokio::spawn(serve(
            "test",
            listener,
            router,
            signal,
            Duration::from_millis(200),
        ));

        let mut response = reqwest::get(format!("http://{}/stream", addr)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.chunk().await.unwrap().unwrap().as_ref(), b"first");

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // The body ends instead of hanging once the service stopped.
        let rest = tokio::time::timeout(Duration::from_secs(1), response.chunk())
            .await
            .unwrap();
        assert!(!matches!(rest, Ok(Some(_))));
    }
}
