//! Sidecar HTTP server implementation.
//!
//! POST requests pass through the idempotency pipeline before reaching the
//! upstream; every other method is proxied untouched. Paths under
//! `/_mnemosyne/` are answered by the sidecar itself.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderName, Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use mnemosyne_config::{IdempotencyConfig, MnemosyneConfig, OnReadError};
use mnemosyne_core::{IdempotencyStore, SharedStore};
use mnemosyne_middleware::{
    full, BoxError, CancellationSignal, IdempotencyMiddleware, MiddlewareContext, Pipeline,
    ReadFailurePolicy, Request, Response, ResponseExt,
};
use mnemosyne_telemetry::{record_request, InFlightGuard};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::error::{SidecarError, SidecarResult};
use crate::proxy::ProxyClient;
use crate::shutdown::{os_shutdown_signal, ConnectionTracker};

/// Path prefix of the sidecar's own endpoints.
pub const INTERNAL_PREFIX: &str = "/_mnemosyne/";

/// Key read by the readiness probe. Its value is irrelevant; only whether
/// the store answers.
const READY_PROBE_KEY: &str = "_mnemosyne:ready-probe";

/// Builds the idempotency gate described by `config`.
pub fn build_gate(config: &IdempotencyConfig, store: SharedStore) -> SidecarResult<IdempotencyMiddleware> {
    let header_name = HeaderName::try_from(config.header_name.as_str())
        .map_err(|e| SidecarError::invalid_setting("idempotency.header_name", e.to_string()))?;

    let read_failure = match config.on_read_error {
        OnReadError::FailOpen => ReadFailurePolicy::FailOpen,
        OnReadError::FailClosed => ReadFailurePolicy::FailClosed,
    };

    Ok(IdempotencyMiddleware::builder(store)
        .header_name(header_name)
        .max_key_len(config.max_key_len)
        .max_body_bytes(config.max_body_bytes)
        .read_failure(read_failure)
        .build())
}

/// Request handling shared by every connection.
pub struct SidecarState {
    pipeline: Pipeline,
    proxy: ProxyClient,
    store: SharedStore,
    ready: AtomicBool,
}

impl SidecarState {
    /// Wires the gate and the upstream client around `store`.
    pub fn new(config: &MnemosyneConfig, store: SharedStore) -> SidecarResult<Self> {
        let gate = build_gate(&config.idempotency, store.clone())?;
        let pipeline = Pipeline::builder().add_pre_handler_stage(gate).build();
        let proxy = ProxyClient::new(&config.upstream)?;

        Ok(Self {
            pipeline,
            proxy,
            store,
            ready: AtomicBool::new(true),
        })
    }

    /// Returns `false` once shutdown has started.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Handles one request.
    pub async fn handle(self: Arc<Self>, request: Request) -> Response {
        let started = Instant::now();
        let _in_flight = InFlightGuard::new();
        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        let response = if let Some(endpoint) = path.strip_prefix(INTERNAL_PREFIX) {
            self.internal(endpoint).await
        } else if method == Method::POST {
            Arc::clone(&self).gated(request).await
        } else {
            let ctx = MiddlewareContext::new();
            let span = request_span(&ctx, &method, &path);
            self.proxy
                .forward(request, ctx.request_id())
                .instrument(span)
                .await
        };

        let status = response.status();
        tracing::debug!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed = ?started.elapsed(),
            "request completed"
        );
        record_request(method.as_str(), status.as_u16(), started.elapsed());
        response
    }

    /// Runs the pipeline on a detached task.
    ///
    /// The task outlives a client disconnect: dropping this future drops the
    /// guard, which cancels the request so the capture adapter stops writing
    /// while the upstream call is left to finish.
    async fn gated(self: Arc<Self>, request: Request) -> Response {
        let signal = CancellationSignal::new();
        let guard = signal.drop_guard();
        let ctx = MiddlewareContext::new().with_cancellation(signal);
        let span = request_span(&ctx, request.method(), request.uri().path());

        let state = Arc::clone(&self);
        let task = tokio::spawn(
            async move {
                let proxy = state.proxy.clone();
                state
                    .pipeline
                    .process(ctx, request, move |ctx, request| {
                        let request_id = ctx.request_id();
                        Box::pin(async move { proxy.forward(request, request_id).await })
                    })
                    .await
            }
            .instrument(span),
        );

        match task.await {
            Ok(response) => {
                // The body is now owned by the connection; dropping it stops capture.
                guard.disarm();
                response
            }
            Err(e) => {
                tracing::error!(error = %e, "request task failed");
                Response::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "request task failed",
                )
            }
        }
    }

    async fn internal(&self, endpoint: &str) -> Response {
        match endpoint {
            "health" => json_response(StatusCode::OK, &json!({ "status": "ok" })),
            "ready" => self.readiness().await,
            "version" => json_response(
                StatusCode::OK,
                &json!({ "name": crate::NAME, "version": crate::VERSION }),
            ),
            _ => Response::json_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("unknown internal endpoint: {INTERNAL_PREFIX}{endpoint}"),
            ),
        }
    }

    async fn readiness(&self) -> Response {
        let backend = self.store.backend();
        if !self.is_ready() {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &json!({ "status": "shutting_down", "store": backend }),
            );
        }

        match self.store.get(READY_PROBE_KEY).await {
            Ok(_) => json_response(
                StatusCode::OK,
                &json!({ "status": "ready", "store": backend }),
            ),
            Err(e) => {
                tracing::warn!(store = backend, error = %e, "readiness probe failed");
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &json!({ "status": "unavailable", "store": backend, "error": e.to_string() }),
                )
            }
        }
    }
}

fn request_span(ctx: &MiddlewareContext, method: &Method, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %ctx.request_id(),
        method = %method,
        path = %path,
    )
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    let mut response = http::Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Sidecar server.
pub struct SidecarServer {
    listener: TcpListener,
    shutdown_timeout: Duration,
    state: Arc<SidecarState>,
}

impl SidecarServer {
    /// Binds the listen address and prepares request handling.
    pub async fn bind(config: &MnemosyneConfig, store: SharedStore) -> SidecarResult<Self> {
        let addr: SocketAddr = config
            .server
            .listen_addr
            .parse()
            .map_err(|e| SidecarError::invalid_setting("server.listen_addr", format!("{e}")))?;

        let state = Arc::new(SidecarState::new(config, store)?);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SidecarError::server(format!("failed to bind {addr}: {e}")))?;

        Ok(Self {
            listener,
            shutdown_timeout: config.server.shutdown_timeout,
            state,
        })
    }

    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SidecarResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared request-handling state.
    pub fn state(&self) -> &Arc<SidecarState> {
        &self.state
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(self) -> SidecarResult<()> {
        self.run_with_shutdown(os_shutdown_signal()).await
    }

    /// Runs until `shutdown` fires, then drains open connections for at
    /// most the configured shutdown timeout.
    pub async fn run_with_shutdown(self, shutdown: CancellationSignal) -> SidecarResult<()> {
        let tracker = ConnectionTracker::new();
        tracing::info!(
            addr = %self.local_addr()?,
            upstream = %self.state.proxy.upstream_url(),
            store = self.state.store.backend(),
            "Mnemosyne sidecar listening"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let state = Arc::clone(&self.state);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, state, shutdown).await {
                                    tracing::debug!(peer = %peer, error = %e, "connection error");
                                }
                                drop(token);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                () = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping sidecar");
                    break;
                }
            }
        }

        self.state.set_ready(false);
        tracing::info!(
            timeout = ?self.shutdown_timeout,
            connections = tracker.active_connections(),
            "waiting for connections to close"
        );

        tokio::select! {
            () = tracker.wait_for_drain() => {
                tracing::info!("All connections closed");
            }
            () = tokio::time::sleep(self.shutdown_timeout) => {
                tracing::warn!(
                    connections = tracker.active_connections(),
                    "shutdown timeout reached with connections still open"
                );
            }
        }

        tracing::info!("Sidecar stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<SidecarState>,
    shutdown: CancellationSignal,
) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request: http::Request<Incoming>| {
        let state = Arc::clone(&state);
        async move {
            let request = request.map(|body| body.map_err(BoxError::from).boxed_unsync());
            Ok::<_, Infallible>(state.handle(request).await)
        }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    }
}
