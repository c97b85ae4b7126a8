//! Middleware stages.
//!
//! - [`idempotency`] - Replays or rejects retried POSTs by idempotency key

pub mod idempotency;

pub use idempotency::{IdempotencyMiddleware, IdempotencyMiddlewareBuilder, ReadFailurePolicy};
