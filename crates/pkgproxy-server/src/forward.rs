//! Reverse-proxy forwarding

use crate::error::{ProxyError, Result};
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::stream::{BoxStream, Stream, StreamExt};
use percent_encoding::percent_decode_str;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes of each forwarded response kept for the debug log
pub const DEFAULT_PREVIEW_LIMIT: usize = 4096;

/// Largest request body forwarded upstream
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Package identifier addressed by a request
///
/// Percent-decodes the path, so `/@scope%2fname` and `/@scope/name` both
/// yield `@scope/name`, and strips leading slashes.
pub fn package_path(uri: &Uri) -> String {
    percent_decode_str(uri.path())
        .decode_utf8_lossy()
        .trim_start_matches('/')
        .to_string()
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Forwards requests verbatim to a target registry
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    preview_limit: usize,
}

impl Forwarder {
    pub fn new(preview_limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            preview_limit,
        })
    }

    /// Send `req` to `target`, keeping method, path, query, headers and body
    ///
    /// `Host` is rewritten to the target's and the original host is passed
    /// in `X-Forwarded-Host`. The response body is streamed back unchanged.
    pub async fn forward(&self, target: &str, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", target.trim_end_matches('/'), path);

        let mut headers = forwardable_headers(&parts.headers);
        headers.remove(HOST);
        if let Some(host) = parts.headers.get(HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if declared.is_some_and(|length| length > MAX_REQUEST_BODY as u64) {
            return Err(ProxyError::PayloadTooLarge {
                limit: MAX_REQUEST_BODY,
            });
        }
        let body = read_body(body, MAX_REQUEST_BODY).await?;

        debug!("Forwarding {} {}", parts.method, url);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|source| ProxyError::Upstream {
                url: url.clone(),
                source,
            })?;

        let status = upstream.status();
        let headers = forwardable_headers(upstream.headers());
        let preview = PreviewStream::new(upstream.bytes_stream().boxed(), self.preview_limit, url);

        let mut response = Response::new(Body::from_stream(preview));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Like [`Forwarder::forward`], answering transport failures with 502
    ///
    /// Request bodies over the forwarding limit are answered with 413.
    pub async fn forward_or_bad_gateway(&self, target: &str, req: Request) -> Response {
        match self.forward(target, req).await {
            Ok(response) => response,
            Err(err @ ProxyError::PayloadTooLarge { .. }) => {
                warn!("Not forwarding to {}: {}", target, err);
                (StatusCode::PAYLOAD_TOO_LARGE, format!("{}\n", err)).into_response()
            }
            Err(err) => {
                warn!("{}", err);
                (StatusCode::BAD_GATEWAY, format!("Bad gateway: {}\n", err)).into_response()
            }
        }
    }
}

/// Collect a request body, failing once it grows past `limit` bytes
async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    let mut stream = body.into_data_stream();
    let mut collected = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::RequestBody(e.to_string()))?;
        if collected.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }
        collected.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(collected))
}

/// Passes a response body through while retaining a bounded prefix of it
///
/// The prefix is logged when the body has been fully sent or dropped.
struct PreviewStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    preview: Vec<u8>,
    limit: usize,
    total: u64,
    url: String,
}

impl PreviewStream {
    fn new(inner: BoxStream<'static, reqwest::Result<Bytes>>, limit: usize, url: String) -> Self {
        Self {
            inner,
            preview: Vec::new(),
            limit,
            total: 0,
            url,
        }
    }

    fn observe(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.limit.saturating_sub(self.preview.len());
        self.preview
            .extend_from_slice(&chunk[..room.min(chunk.len())]);
    }
}

impl Stream for PreviewStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.as_mut().poll_next(cx));
        if let Some(Ok(chunk)) = &item {
            self.observe(chunk);
        }
        Poll::Ready(item)
    }
}

impl Drop for PreviewStream {
    fn drop(&mut self) {
        debug!(
            "Response from {} ({} bytes): {}",
            self.url,
            self.total,
            String::from_utf8_lossy(&self.preview)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use futures::stream;

    #[test]
    fn test_package_path_decoding() {
        let uri: Uri = "/@acme%2fui".parse().unwrap();
        assert_eq!(package_path(&uri), "@acme/ui");

        let uri: Uri = "/@acme/ui?write=true".parse().unwrap();
        assert_eq!(package_path(&uri), "@acme/ui");

        let uri: Uri = "/lodash".parse().unwrap();
        assert_eq!(package_path(&uri), "lodash");
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.append("npm-session", HeaderValue::from_static("abc"));

        let forwarded = forwardable_headers(&headers);
        assert_eq!(forwarded.len(), 2);
        assert!(forwarded.contains_key("accept"));
        assert!(forwarded.contains_key("npm-session"));
    }

    #[tokio::test]
    async fn test_request_body_limit() {
        let body = read_body(Body::from("0123456789"), 10).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"0123456789"));

        let too_large = read_body(Body::from("0123456789"), 4).await;
        assert!(matches!(
            too_large,
            Err(ProxyError::PayloadTooLarge { limit: 4 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let forwarder = Forwarder::new(DEFAULT_PREVIEW_LIMIT).unwrap();
        let req = axum::http::Request::builder()
            .method("PUT")
            .uri("/@acme/ui")
            .header(CONTENT_LENGTH, (MAX_REQUEST_BODY as u64 + 1).to_string())
            .body(Body::empty())
            .unwrap();

        // Rejected before any connection to the target is attempted.
        let response = forwarder
            .forward_or_bad_gateway("http://127.0.0.1:9", req)
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_preview_is_bounded_and_body_untouched() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"0123456789")),
            Ok(Bytes::from_static(b"abcdefghij")),
        ];
        let mut preview =
            PreviewStream::new(stream::iter(chunks).boxed(), 12, "http://upstream".to_string());

        let mut body = Vec::new();
        while let Some(chunk) = preview.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(body, b"0123456789abcdefghij");
        assert_eq!(preview.preview, b"0123456789ab");
        assert_eq!(preview.total, 20);
    }
}
