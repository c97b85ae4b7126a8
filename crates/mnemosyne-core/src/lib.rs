//! # Mnemosyne Core
//!
//! Core types for idempotent-write caching.
//!
//! This crate provides the foundational types shared by every Mnemosyne crate:
//!
//! - [`Record`] - The cached outcome of one idempotent request
//! - [`Fingerprint`] / [`FingerprintHasher`] - SHA-256 digest of a request body
//! - [`IdempotencyStore`] - Storage contract implemented by the backends
//! - [`IdempotencyError`] / [`StoreError`] - Error taxonomy with HTTP mapping
//! - [`RequestId`] - UUID v7 request identifier

#![doc(html_root_url = "https://docs.rs/mnemosyne-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod fingerprint;
mod record;
mod request_id;
pub mod store;

pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, IdempotencyError, StoreError};
pub use fingerprint::{Fingerprint, FingerprintHasher, FINGERPRINT_LEN};
pub use record::{Mismatch, Record, PENDING_STATUS};
pub use request_id::RequestId;
pub use store::{BoxFuture, IdempotencyStore, SharedStore, DEFAULT_RETENTION};
