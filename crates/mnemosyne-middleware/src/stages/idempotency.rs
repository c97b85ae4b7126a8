//! Idempotency gate.
//!
//! Lets a client retry a POST safely. The first request carrying a given
//! `Idempotency-Key` runs the handler and its response is captured into the
//! store; later requests with the same key and the same target and body get
//! the stored response replayed instead of running the handler again.
//!
//! ## Decision order
//!
//! | Condition | Response |
//! |-----------|----------|
//! | Method is not POST | `405`, `Allow: POST` |
//! | Key missing, blank, non-visible ASCII or too long | `400` |
//! | Body larger than the limit | `413` |
//! | Body unreadable | `500` |
//! | Unseen key | run the handler, capture its response |
//! | Key pending | `409` |
//! | Key settled for another target or body | `422` |
//! | Key settled, same target and body | stored status and body, `Idempotent-Replayed: true` |
//! | Store read fails | fail open (run the handler) or `503` |
//! | Store write fails before the handler's status is persisted | `500` |
//!
//! ## Example
//!
//! ```ignore
//! use mnemosyne_middleware::{IdempotencyMiddleware, Pipeline, ReadFailurePolicy};
//!
//! let gate = IdempotencyMiddleware::builder(store)
//!     .max_body_bytes(1024 * 1024)
//!     .read_failure(ReadFailurePolicy::FailClosed)
//!     .build();
//!
//! let pipeline = Pipeline::builder().add_pre_handler_stage(gate).build();
//! ```

use crate::body::tee_body;
use crate::capture::CaptureAdapter;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{full, Request, Response, ResponseExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use http_body_util::BodyExt;
use mnemosyne_core::{Fingerprint, IdempotencyError, Record, SharedStore, StoreError};
use mnemosyne_telemetry::metrics::{outcome, record_idempotency_outcome, record_store_error};

/// Default idempotency key header.
pub const DEFAULT_HEADER: &str = "idempotency-key";

/// Header set on replayed responses.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// Default maximum key length in bytes.
pub const DEFAULT_MAX_KEY_LEN: usize = 255;

/// Default maximum buffered body size (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// What the gate does when the store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFailurePolicy {
    /// Treat the key as unseen and run the handler.
    #[default]
    FailOpen,
    /// Reject with `503 Service Unavailable`.
    FailClosed,
}

/// The idempotency gate.
///
/// # Stuck keys
///
/// If the client disconnects, or the store rejects the status write, after
/// the record is created but before the handler's status is persisted, the
/// record stays pending. Retries with that key get `409` until the store's
/// retention window (24 hours by default) expires the record. Size the
/// retention with that in mind. A response body that fails part way through
/// is different: its record is removed, so the key can be retried at once.
#[derive(Clone)]
pub struct IdempotencyMiddleware {
    store: SharedStore,
    header_name: HeaderName,
    max_key_len: usize,
    max_body_bytes: usize,
    read_failure: ReadFailurePolicy,
}

/// Builder for [`IdempotencyMiddleware`].
pub struct IdempotencyMiddlewareBuilder {
    inner: IdempotencyMiddleware,
}

impl IdempotencyMiddlewareBuilder {
    /// Sets the header carrying the key.
    #[must_use]
    pub fn header_name(mut self, header_name: HeaderName) -> Self {
        self.inner.header_name = header_name;
        self
    }

    /// Sets the longest accepted key in bytes.
    #[must_use]
    pub fn max_key_len(mut self, max_key_len: usize) -> Self {
        self.inner.max_key_len = max_key_len;
        self
    }

    /// Sets the largest request body the gate buffers.
    #[must_use]
    pub fn max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.inner.max_body_bytes = max_body_bytes;
        self
    }

    /// Sets the store read failure policy.
    #[must_use]
    pub fn read_failure(mut self, policy: ReadFailurePolicy) -> Self {
        self.inner.read_failure = policy;
        self
    }

    /// Builds the gate.
    #[must_use]
    pub fn build(self) -> IdempotencyMiddleware {
        self.inner
    }
}

impl IdempotencyMiddleware {
    /// Creates a gate with default settings.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self::builder(store).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder(store: SharedStore) -> IdempotencyMiddlewareBuilder {
        IdempotencyMiddlewareBuilder {
            inner: Self {
                store,
                header_name: HeaderName::from_static(DEFAULT_HEADER),
                max_key_len: DEFAULT_MAX_KEY_LEN,
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                read_failure: ReadFailurePolicy::default(),
            },
        }
    }

    /// The header carrying the key.
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// The store read failure policy.
    #[must_use]
    pub fn read_failure(&self) -> ReadFailurePolicy {
        self.read_failure
    }

    fn extract_key(&self, headers: &HeaderMap) -> Result<String, IdempotencyError> {
        let header = self.header_name.as_str();
        let value = headers
            .get(&self.header_name)
            .ok_or_else(|| IdempotencyError::missing_key(header))?;

        let key = trim_ascii_whitespace(value.as_bytes());
        if key.is_empty() {
            return Err(IdempotencyError::missing_key(header));
        }
        if !key.iter().all(|b| (0x21..=0x7e).contains(b)) {
            return Err(IdempotencyError::invalid_key(
                header,
                "must be visible ASCII",
            ));
        }
        if key.len() > self.max_key_len {
            return Err(IdempotencyError::invalid_key(
                header,
                format!("longer than {} bytes", self.max_key_len),
            ));
        }

        // Visible ASCII is valid UTF-8
        Ok(String::from_utf8_lossy(key).into_owned())
    }

    async fn gate(
        &self,
        ctx: &mut MiddlewareContext,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, IdempotencyError> {
        if request.method() != Method::POST {
            return Err(IdempotencyError::method_not_allowed(request.method().as_str()));
        }

        let key = self.extract_key(request.headers())?;
        let target = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());

        let (parts, body) = request.into_parts();
        let buffered = tee_body(body, self.max_body_bytes).await?;

        match self.store.get(&key).await {
            Ok(Some(existing)) => return resolve_existing(&key, &target, &buffered.fingerprint, existing),
            Ok(None) => {}
            Err(source) => self.read_failed(&key, &target, source)?,
        }

        let record = Record::pending(target.as_str(), buffered.fingerprint);
        match self.store.insert_if_absent(&key, &record).await {
            Ok(true) => {}
            Ok(false) => {
                // Another request created the key between our read and write
                return match self.store.get(&key).await {
                    Ok(Some(existing)) => {
                        resolve_existing(&key, &target, &buffered.fingerprint, existing)
                    }
                    _ => Err(IdempotencyError::in_flight(key)),
                };
            }
            Err(source) => {
                tracing::error!(
                    idempotency_key = %key,
                    target = %target,
                    error = %source,
                    "failed to create idempotency record"
                );
                record_store_error("insert_if_absent");
                return Err(IdempotencyError::StoreWrite { source });
            }
        }

        tracing::debug!(idempotency_key = %key, target = %target, "executing handler for new key");

        let request = Request::from_parts(parts, full(buffered.bytes));
        let response = next.run(ctx, request).await;
        let (parts, body) = response.into_parts();

        let mut capture =
            CaptureAdapter::new(key, record, self.store.clone(), ctx.cancellation().clone());
        if let Err(source) = capture.write_status(parts.status).await {
            tracing::error!(
                idempotency_key = %capture.key(),
                target = %target,
                status = parts.status.as_u16(),
                error = %source,
                "failed to persist response status"
            );
            record_store_error("set");
            return Err(IdempotencyError::StoreWrite { source });
        }

        record_idempotency_outcome(outcome::CREATED);
        Ok(Response::from_parts(
            parts,
            capture.into_body(body).boxed_unsync(),
        ))
    }

    fn read_failed(&self, key: &str, target: &str, source: StoreError) -> Result<(), IdempotencyError> {
        record_store_error("get");
        match self.read_failure {
            ReadFailurePolicy::FailOpen => {
                tracing::warn!(
                    idempotency_key = %key,
                    target = %target,
                    error = %source,
                    "idempotency store read failed; treating key as unseen"
                );
                Ok(())
            }
            ReadFailurePolicy::FailClosed => {
                tracing::warn!(
                    idempotency_key = %key,
                    target = %target,
                    error = %source,
                    "idempotency store read failed; rejecting request"
                );
                Err(IdempotencyError::StoreUnavailable { source })
            }
        }
    }
}

fn resolve_existing(
    key: &str,
    target: &str,
    fingerprint: &Fingerprint,
    existing: Record,
) -> Result<Response, IdempotencyError> {
    let Some(status) = existing.status_code() else {
        return Err(IdempotencyError::in_flight(key));
    };
    if let Some(mismatch) = existing.mismatch(target, fingerprint) {
        return Err(IdempotencyError::key_reused(key, mismatch));
    }

    tracing::debug!(
        idempotency_key = %key,
        target = %target,
        status = status.as_u16(),
        "replaying stored response"
    );
    record_idempotency_outcome(outcome::REPLAYED);

    let (_, _, _, body) = existing.into_parts();
    let mut response = http::Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        HeaderName::from_static(REPLAYED_HEADER),
        HeaderValue::from_static("true"),
    );
    Ok(response)
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn outcome_for(error: &IdempotencyError) -> &'static str {
    match error {
        IdempotencyError::InFlight { .. } => outcome::CONFLICT,
        IdempotencyError::KeyReused { .. } => outcome::MISMATCH,
        IdempotencyError::StoreUnavailable { .. } | IdempotencyError::StoreWrite { .. } => {
            outcome::STORE_ERROR
        }
        _ => outcome::REJECTED,
    }
}

impl Middleware for IdempotencyMiddleware {
    fn name(&self) -> &'static str {
        "idempotency"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.gate(ctx, request, next).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        status = error.status_code().as_u16(),
                        error = %error,
                        "idempotency gate rejected request"
                    );
                    record_idempotency_outcome(outcome_for(&error));
                    Response::from_idempotency_error(&error)
                }
            }
        })
    }
}

impl std::fmt::Debug for IdempotencyMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyMiddleware")
            .field("backend", &self.store.backend())
            .field("header_name", &self.header_name)
            .field("max_key_len", &self.max_key_len)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("read_failure", &self.read_failure)
            .finish()
    }
}
