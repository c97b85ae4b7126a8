//! Response capture.
//!
//! [`CaptureAdapter`] owns the record produced by one request and mirrors
//! every status and body write into the store before the write is forwarded,
//! so the store always holds every byte the client has seen.
//! [`CaptureBody`] applies the adapter to a streaming response body one frame
//! at a time. A body that fails part way through is removed from the store,
//! so a torn response is never replayed.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::StatusCode;
use http_body::{Body as HttpBody, Frame, SizeHint};
use mnemosyne_core::{BoxFuture, Record, SharedStore, StoreError};

use crate::signal::CancellationSignal;
use crate::types::{Body, BoxError};

/// Mirrors response writes into one record and persists each one.
pub struct CaptureAdapter {
    key: String,
    record: Record,
    store: SharedStore,
    cancellation: CancellationSignal,
}

impl CaptureAdapter {
    /// Binds an adapter to a key, its pending record, the store, and the
    /// request's cancellation signal.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        record: Record,
        store: SharedStore,
        cancellation: CancellationSignal,
    ) -> Self {
        Self {
            key: key.into(),
            record,
            store,
            cancellation,
        }
    }

    /// The idempotency key this adapter writes under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The record as captured so far.
    #[must_use]
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Returns `true` once the request's cancellation signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Records the response status and persists it.
    ///
    /// Only the first status sticks. Returns `Ok(false)` without touching the
    /// store when the status was already set or the request was cancelled.
    pub async fn write_status(&mut self, status: StatusCode) -> Result<bool, StoreError> {
        if self.is_cancelled() || !self.record.settle(status) {
            return Ok(false);
        }
        self.store.set(&self.key, &self.record).await?;
        Ok(true)
    }

    /// Appends `bytes` to the record body and persists it.
    ///
    /// A write before any status settles the record at `200 OK`. After
    /// cancellation nothing is recorded and `Ok(0)` is returned.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<usize, StoreError> {
        if self.is_cancelled() {
            return Ok(0);
        }
        if self.record.is_pending() {
            self.record.settle(StatusCode::OK);
        }
        self.record.append_body(bytes);
        self.store.set(&self.key, &self.record).await?;
        Ok(bytes.len())
    }

    /// Deletes the record, making the key unseen again.
    pub async fn discard(&self) -> Result<(), StoreError> {
        self.store.remove(&self.key).await
    }

    /// Wraps a response body so each data frame is persisted before it is
    /// yielded.
    #[must_use]
    pub fn into_body(self, inner: Body) -> CaptureBody {
        CaptureBody {
            inner,
            state: State::Streaming(self),
        }
    }
}

impl fmt::Debug for CaptureAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureAdapter")
            .field("key", &self.key)
            .field("record", &self.record)
            .field("backend", &self.store.backend())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type Persist = BoxFuture<'static, (CaptureAdapter, Result<usize, StoreError>)>;

enum State {
    Streaming(CaptureAdapter),
    Persisting(Persist, Frame<Bytes>),
    Discarding(BoxFuture<'static, ()>, BoxError),
    Done,
}

/// Response body decorator driven by a [`CaptureAdapter`].
///
/// Ends early once the request is cancelled. A store failure surfaces as a
/// body error so the host aborts the connection instead of sending bytes the
/// store does not hold. On any body error the record is discarded before the
/// error is yielded.
pub struct CaptureBody {
    inner: Body,
    state: State,
}

impl CaptureBody {
    fn persist(mut adapter: CaptureAdapter, data: Bytes) -> Persist {
        Box::pin(async move {
            let result = adapter.write(&data).await;
            (adapter, result)
        })
    }

    fn discard(adapter: CaptureAdapter) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = adapter.discard().await {
                tracing::error!(
                    idempotency_key = %adapter.key(),
                    error = %e,
                    "failed to discard torn response; retries will replay it"
                );
                mnemosyne_telemetry::record_store_error("remove");
            }
        })
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Done => return Poll::Ready(None),

                State::Discarding(mut discard, error) => {
                    return match discard.as_mut().poll(cx) {
                        Poll::Pending => {
                            this.state = State::Discarding(discard, error);
                            Poll::Pending
                        }
                        Poll::Ready(()) => Poll::Ready(Some(Err(error))),
                    };
                }

                State::Persisting(mut persist, frame) => match persist.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.state = State::Persisting(persist, frame);
                        return Poll::Pending;
                    }
                    // Nothing written means the request was cancelled
                    Poll::Ready((_, Ok(0))) => return Poll::Ready(None),
                    Poll::Ready((adapter, Ok(_))) => {
                        this.state = State::Streaming(adapter);
                        return Poll::Ready(Some(Ok(frame)));
                    }
                    Poll::Ready((adapter, Err(e))) => {
                        tracing::error!(
                            idempotency_key = %adapter.key(),
                            status = adapter.record().status(),
                            error = %e,
                            "failed to persist response body; aborting response"
                        );
                        mnemosyne_telemetry::record_store_error("set");
                        this.state = State::Discarding(Self::discard(adapter), Box::new(e));
                    }
                },

                State::Streaming(adapter) => {
                    if adapter.is_cancelled() {
                        tracing::debug!(
                            idempotency_key = %adapter.key(),
                            "request cancelled; dropping remaining response"
                        );
                        return Poll::Ready(None);
                    }

                    match Pin::new(&mut this.inner).poll_frame(cx) {
                        Poll::Pending => {
                            this.state = State::Streaming(adapter);
                            return Poll::Pending;
                        }
                        Poll::Ready(None) => return Poll::Ready(None),
                        Poll::Ready(Some(Err(e))) => {
                            tracing::warn!(
                                idempotency_key = %adapter.key(),
                                error = %e,
                                "response body failed mid-stream; discarding record"
                            );
                            this.state = State::Discarding(Self::discard(adapter), e);
                        }
                        Poll::Ready(Some(Ok(frame))) => match frame.data_ref() {
                            Some(data) if !data.is_empty() => {
                                let data = data.clone();
                                this.state =
                                    State::Persisting(Self::persist(adapter, data), frame);
                            }
                            _ => {
                                this.state = State::Streaming(adapter);
                                return Poll::Ready(Some(Ok(frame)));
                            }
                        },
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.state {
            State::Done => true,
            State::Streaming(_) => self.inner.is_end_stream(),
            State::Persisting(..) | State::Discarding(..) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.state {
            State::Streaming(_) => self.inner.size_hint(),
            _ => SizeHint::default(),
        }
    }
}

impl fmt::Debug for CaptureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Streaming(_) => "streaming",
            State::Persisting(..) => "persisting",
            State::Discarding(..) => "discarding",
            State::Done => "done",
        };
        f.debug_struct("CaptureBody").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::full;
    use http_body_util::{BodyExt, StreamBody};
    use mnemosyne_core::{Fingerprint, IdempotencyStore};
    use mnemosyne_store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn pending() -> Record {
        Record::pending("/orders", Fingerprint::of(b"{}"))
    }

    fn adapter(store: &Arc<MemoryStore>, signal: &CancellationSignal) -> CaptureAdapter {
        CaptureAdapter::new("k1", pending(), store.clone(), signal.clone())
    }

    struct FailingStore;

    impl IdempotencyStore for FailingStore {
        fn backend(&self) -> &'static str {
            "failing"
        }

        fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<Record>, StoreError>> {
            Box::pin(async { Err(StoreError::unavailable("failing", "down")) })
        }

        fn set<'a>(&'a self, _key: &'a str, _record: &'a Record) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async { Err(StoreError::unavailable("failing", "down")) })
        }

        fn insert_if_absent<'a>(
            &'a self,
            _key: &'a str,
            _record: &'a Record,
        ) -> BoxFuture<'a, Result<bool, StoreError>> {
            Box::pin(async { Err(StoreError::unavailable("failing", "down")) })
        }

        fn remove<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async { Err(StoreError::unavailable("failing", "down")) })
        }
    }

    #[tokio::test]
    async fn test_status_persisted_once() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);

        assert!(capture.write_status(StatusCode::CREATED).await.unwrap());
        assert!(!capture.write_status(StatusCode::BAD_GATEWAY).await.unwrap());

        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.status(), 201);
    }

    #[tokio::test]
    async fn test_first_write_defaults_to_200() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);

        assert_eq!(capture.write(b"hello").await.unwrap(), 5);
        assert_eq!(capture.write(b" world").await.unwrap(), 6);

        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.status(), 200);
        assert_eq!(stored.body(), b"hello world");
    }

    #[tokio::test]
    async fn test_writes_after_cancel_are_dropped() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);
        capture.write_status(StatusCode::OK).await.unwrap();
        capture.write(b"a").await.unwrap();

        signal.cancel();
        assert_eq!(capture.write(b"b").await.unwrap(), 0);
        assert!(!capture.write_status(StatusCode::CREATED).await.unwrap());

        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.body(), b"a");
    }

    #[tokio::test]
    async fn test_capture_body_persists_every_frame() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);
        capture.write_status(StatusCode::CREATED).await.unwrap();

        let frames = ["order ", "#", "42"]
            .into_iter()
            .map(|s| Ok::<_, BoxError>(Frame::data(Bytes::from_static(s.as_bytes()))));
        let inner = StreamBody::new(futures_util::stream::iter(frames)).boxed_unsync();

        let bytes = capture.into_body(inner).collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"order #42");

        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.status(), 201);
        assert_eq!(stored.body(), b"order #42");
    }

    #[tokio::test]
    async fn test_capture_body_stops_after_cancel() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);
        capture.write_status(StatusCode::OK).await.unwrap();

        let mut body = capture.into_body(full("first"));
        signal.cancel();

        assert!(body.frame().await.is_none());
        assert!(body.is_end_stream());
        let stored = store.get("k1").await.unwrap().unwrap();
        assert!(stored.body().is_empty());
    }

    #[tokio::test]
    async fn test_capture_body_discards_torn_response() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let signal = CancellationSignal::new();
        let mut capture = adapter(&store, &signal);
        capture.write_status(StatusCode::CREATED).await.unwrap();

        let frames: Vec<Result<Frame<Bytes>, BoxError>> = vec![
            Ok(Frame::data(Bytes::from_static(b"{\"id\":4"))),
            Err("upstream reset".into()),
        ];
        let inner = StreamBody::new(futures_util::stream::iter(frames)).boxed_unsync();
        let mut body = capture.into_body(inner);

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), Bytes::from_static(b"{\"id\":4"));
        assert!(store.get("k1").await.unwrap().is_some());

        let error = body.frame().await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "upstream reset");
        assert!(body.frame().await.is_none());
        assert!(store.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capture_body_surfaces_store_failure() {
        let signal = CancellationSignal::new();
        let capture = CaptureAdapter::new("k1", pending(), Arc::new(FailingStore), signal);

        let mut body = capture.into_body(full("payload"));
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .unwrap();
        assert!(matches!(frame, Some(Err(_))));
        assert!(body.frame().await.is_none());
    }
}
