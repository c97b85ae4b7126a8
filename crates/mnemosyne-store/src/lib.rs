//! # Mnemosyne Store
//!
//! Storage backends for idempotency records.
//!
//! - [`MemoryStore`] - In-process map with a retention window
//! - [`RedisStore`] - Redis with native TTL (feature `redis`, on by default)
//! - [`codec`] - Binary record encoding used by remote backends
//!
//! [`build_store`] picks the backend from configuration.
//!
//! # Example
//!
//! ```no_run
//! use mnemosyne_config::IdempotencyConfig;
//! use mnemosyne_core::IdempotencyStore;
//!
//! # async fn example() -> Result<(), mnemosyne_core::StoreError> {
//! let store = mnemosyne_store::build_store(&IdempotencyConfig::default()).await?;
//! assert_eq!(store.backend(), "memory");
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/mnemosyne-store/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use mnemosyne_config::{IdempotencyConfig, StoreBackend};
use mnemosyne_core::{SharedStore, StoreError};

pub mod codec;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Builds the store backend selected by `config`.
///
/// # Errors
///
/// Returns `StoreError::Unavailable` if the Redis backend is selected and
/// cannot be reached, has no URL, or was compiled out.
pub async fn build_store(config: &IdempotencyConfig) -> Result<SharedStore, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!(ttl = ?config.ttl, "using in-memory idempotency store");
            Ok(Arc::new(MemoryStore::new(config.ttl)))
        }
        StoreBackend::Redis => build_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn build_redis(config: &IdempotencyConfig) -> Result<SharedStore, StoreError> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| StoreError::unavailable("redis", "idempotency.redis_url is not set"))?;
    let store = RedisStore::connect(url, config.key_prefix.clone(), config.ttl).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn build_redis(_config: &IdempotencyConfig) -> Result<SharedStore, StoreError> {
    Err(StoreError::unavailable(
        "redis",
        "built without the `redis` feature",
    ))
}
