//! In-process record store.
//!
//! Entries live in a lock-guarded map. Every write also appends
//! `(written_at, key, generation)` to a queue; writes happen in time order, so
//! the queue front is always the oldest write and expiry only has to pop from
//! the front. Queue items superseded by a later write of the same key carry a
//! stale generation and are skipped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use mnemosyne_core::{BoxFuture, IdempotencyStore, Record, StoreError, DEFAULT_RETENTION};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Queue length above which stale items are compacted away.
const COMPACT_THRESHOLD: usize = 64;

/// In-memory idempotency store with a fixed retention window.
///
/// Expired entries are evicted on writes; reads ignore them.
///
/// # Example
///
/// ```
/// use mnemosyne_store::MemoryStore;
/// use std::time::Duration;
///
/// let store = MemoryStore::new(Duration::from_secs(3600));
/// assert!(store.is_empty());
/// ```
pub struct MemoryStore {
    retention: Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    queue: VecDeque<QueueItem>,
    next_generation: u64,
}

struct Entry {
    record: Record,
    written_at: Instant,
    generation: u64,
}

struct QueueItem {
    written_at: Instant,
    key: String,
    generation: u64,
}

impl MemoryStore {
    /// Creates a store that keeps records for `retention` after their last write.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Creates a store with the default 24 hour retention.
    #[must_use]
    pub fn with_default_retention() -> Self {
        Self::new(DEFAULT_RETENTION)
    }

    /// Returns the retention window.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Returns the number of entries held, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, written_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(written_at) >= self.retention
    }

    fn lookup(&self, key: &str) -> Option<Record> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !self.is_expired(entry.written_at, now))
            .map(|entry| entry.record.clone())
    }

    fn store(&self, key: &str, record: &Record, only_if_absent: bool) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.evict_expired(&mut inner, now);

        if only_if_absent && inner.entries.contains_key(key) {
            return false;
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.entries.insert(
            key.to_string(),
            Entry {
                record: record.clone(),
                written_at: now,
                generation,
            },
        );
        inner.queue.push_back(QueueItem {
            written_at: now,
            key: key.to_string(),
            generation,
        });
        Self::compact(&mut inner);
        true
    }

    fn evict_expired(&self, inner: &mut Inner, now: Instant) {
        while let Some(front) = inner.queue.front() {
            if !self.is_expired(front.written_at, now) {
                break;
            }
            let Some(item) = inner.queue.pop_front() else {
                break;
            };
            let current = inner
                .entries
                .get(&item.key)
                .is_some_and(|entry| entry.generation == item.generation);
            if current {
                inner.entries.remove(&item.key);
                tracing::trace!(key = %item.key, "evicted expired idempotency record");
            }
        }
    }

    /// Drops queue items superseded by later writes once they dominate the queue.
    fn compact(inner: &mut Inner) {
        if inner.queue.len() <= COMPACT_THRESHOLD.max(inner.entries.len() * 2) {
            return;
        }
        let Inner { entries, queue, .. } = inner;
        queue.retain(|item| {
            entries
                .get(&item.key)
                .is_some_and(|entry| entry.generation == item.generation)
        });
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_default_retention()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("retention", &self.retention)
            .field("entries", &self.len())
            .finish()
    }
}

impl IdempotencyStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Record>, StoreError>> {
        Box::pin(async move { Ok(self.lookup(key)) })
    }

    fn set<'a>(&'a self, key: &'a str, record: &'a Record) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.store(key, record, false);
            Ok(())
        })
    }

    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        record: &'a Record,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.store(key, record, true)) })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            // The key's queue item goes stale and is skipped on eviction
            self.inner.lock().entries.remove(key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_core::Fingerprint;
    use std::sync::Arc;

    fn record(target: &str) -> Record {
        Record::pending(target, Fingerprint::of(b"{}"))
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::with_default_retention();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::with_default_retention();
        let mut rec = record("/orders");
        store.set("k", &rec).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(rec.clone()));

        rec.settle(http::StatusCode::CREATED);
        rec.append_body(b"done");
        store.set("k", &rec).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(rec));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryStore::with_default_retention();
        assert!(store.insert_if_absent("k", &record("/a")).await.unwrap());
        assert!(!store.insert_if_absent("k", &record("/b")).await.unwrap());
        let kept = store.get("k").await.unwrap().unwrap();
        assert_eq!(kept.target(), "/a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_ignore_expired_entries() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set("k", &record("/orders")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        // Not evicted until the next write.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_evict_expired_entries() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set("old", &record("/a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        store.set("newer", &record("/b")).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        store.set("fresh", &record("/c")).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("newer").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_restarts_retention() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set("k", &record("/orders")).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        store.set("k", &record("/orders")).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        // The stale queue item from the first write must not evict the second.
        store.set("other", &record("/x")).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_can_be_recreated() {
        let store = MemoryStore::new(Duration::from_secs(60));
        assert!(store.insert_if_absent("k", &record("/a")).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.insert_if_absent("k", &record("/b")).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().target(), "/b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_key_can_be_recreated() {
        let store = MemoryStore::new(Duration::from_secs(60));
        assert!(store.insert_if_absent("k", &record("/a")).await.unwrap());
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.insert_if_absent("k", &record("/b")).await.unwrap());

        // The first write's queue item expires here and must not evict the new entry.
        tokio::time::advance(Duration::from_secs(31)).await;
        store.set("other", &record("/x")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().target(), "/b");

        // Removing a missing key is a no-op.
        store.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_is_compacted() {
        let store = MemoryStore::with_default_retention();
        for _ in 0..1_000 {
            store.set("k", &record("/orders")).await.unwrap();
        }
        assert!(store.queue_len() <= COMPACT_THRESHOLD + 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_has_one_winner() {
        let store = Arc::new(MemoryStore::with_default_retention());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent("race", &record(&format!("/{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
