//! Storage contract for idempotency records.
//!
//! Backends live in the `mnemosyne-store` crate. The gate and the capture
//! adapter only ever talk to a [`SharedStore`], so the backend is picked once
//! at construction time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{Record, StoreError};

/// Boxed future type used by store and middleware traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn IdempotencyStore>;

/// Default record retention window (24 hours).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Key-value storage for idempotency records.
///
/// Implementations must be safe to share across request tasks. Calls may
/// suspend on I/O.
///
/// # Example
///
/// ```ignore
/// use mnemosyne_core::{IdempotencyStore, Record};
///
/// async fn lookup(store: &dyn IdempotencyStore) {
///     match store.get("order-42").await {
///         Ok(Some(record)) if record.is_pending() => { /* in flight */ }
///         Ok(Some(record)) => { /* replay */ }
///         Ok(None) => { /* first time */ }
///         Err(e) => { /* backend trouble */ }
///     }
/// }
/// ```
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;

    /// Fetches the record stored under `key`.
    ///
    /// A missing or expired key is `Ok(None)`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Record>, StoreError>>;

    /// Stores `record` under `key`, replacing any previous value and
    /// restarting its retention window.
    fn set<'a>(&'a self, key: &'a str, record: &'a Record) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Stores `record` under `key` only if no live record exists.
    ///
    /// Returns `true` if this call created the entry. The check and the
    /// write happen atomically with respect to other callers of the same
    /// backend.
    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        record: &'a Record,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Deletes the record stored under `key`, if any.
    ///
    /// Used to forget a response that failed part way through, so the key
    /// can be retried from scratch.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<S: IdempotencyStore + ?Sized> IdempotencyStore for Arc<S> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Record>, StoreError>> {
        (**self).get(key)
    }

    fn set<'a>(&'a self, key: &'a str, record: &'a Record) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).set(key, record)
    }

    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        record: &'a Record,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        (**self).insert_if_absent(key, record)
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).remove(key)
    }
}
