//! HTTP proxy client for forwarding requests to the upstream service.
//!
//! Request bodies are read in full before forwarding. Response bodies are
//! streamed back frame by frame so the idempotency gate can persist each
//! chunk as it passes through.

use std::time::Duration;

use futures_util::TryStreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use mnemosyne_config::UpstreamConfig;
use mnemosyne_core::RequestId;
use mnemosyne_middleware::{BoxError, Request, Response, ResponseExt};
use reqwest::Client;

use crate::error::{SidecarError, SidecarResult};

/// Header carrying the sidecar's request ID to the upstream.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP proxy client for forwarding requests to upstream.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    upstream_url: String,
    timeout: Duration,
}

impl ProxyClient {
    /// Create a new proxy client.
    pub fn new(upstream: &UpstreamConfig) -> SidecarResult<Self> {
        let client = Client::builder()
            .timeout(upstream.timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| SidecarError::upstream(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            upstream_url: upstream.url.trim_end_matches('/').to_string(),
            timeout: upstream.timeout,
        })
    }

    /// Forward a request and return the upstream's response.
    ///
    /// Transport failures become a JSON `502` (or `504` on timeout) so the
    /// caller always gets a response.
    pub async fn forward(&self, request: Request, request_id: RequestId) -> Response {
        match self.try_forward(request, request_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    upstream = %self.upstream_url,
                    error = %e,
                    "upstream request failed"
                );
                Response::json_error(e.status_code(), e.error_code(), &e.to_string())
            }
        }
    }

    async fn try_forward(&self, request: Request, request_id: RequestId) -> SidecarResult<Response> {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| SidecarError::RequestBody {
                message: e.to_string(),
            })?
            .to_bytes();

        let mut headers = upstream_headers(&parts.headers);
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        let mut builder = self
            .client
            .request(parts.method, self.url_for(&parts.uri))
            .headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let upstream = builder.send().await?;
        let status = upstream.status();
        let headers = downstream_headers(upstream.headers());

        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(BoxError::from);

        let mut response = http::Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Joins the upstream base URL with the request's path and query.
    fn url_for(&self, uri: &http::Uri) -> String {
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}{}", self.upstream_url, path)
    }

    /// Get the upstream URL.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Get the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Check if a header is hop-by-hop (should not be forwarded).
pub fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers sent upstream: hop-by-hop headers, `Host` and `Content-Length`
/// are dropped; the client sets the latter two for the new connection.
fn upstream_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, |name| *name == HOST || *name == CONTENT_LENGTH)
}

/// Headers returned to the client. The body is re-framed, so
/// `Content-Length` is dropped along with hop-by-hop headers.
fn downstream_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, |name| *name == CONTENT_LENGTH)
}

fn filter(headers: &HeaderMap, also_drop: impl Fn(&HeaderName) -> bool) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop_header(name) && !also_drop(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}
