//! # Mnemosyne Middleware
//!
//! Request pipeline for idempotent-write caching.
//!
//! ```text
//! Request → IdempotencyMiddleware ─┬─ replay / 4xx / 5xx ──────────────→ Response
//!                                  └─ Handler → CaptureBody (persist, forward) → Response
//! ```
//!
//! - [`Pipeline`] / [`Middleware`] / [`Next`] - Ordered, async middleware chain
//! - [`MiddlewareContext`] - Per-request state, including the [`CancellationSignal`]
//! - [`IdempotencyMiddleware`] - The idempotency gate
//! - [`CaptureAdapter`] / [`CaptureBody`] - Mirrors the handler's response into the store
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mnemosyne_middleware::{full, IdempotencyMiddleware, MiddlewareContext, Pipeline};
//! use mnemosyne_store::MemoryStore;
//!
//! # async fn run(request: mnemosyne_middleware::Request) {
//! let store = Arc::new(MemoryStore::with_default_retention());
//! let pipeline = Pipeline::builder()
//!     .add_pre_handler_stage(IdempotencyMiddleware::new(store))
//!     .build();
//!
//! let response = pipeline
//!     .process(MiddlewareContext::new(), request, |_ctx, _req| {
//!         Box::pin(async { http::Response::new(full("created")) })
//!     })
//!     .await;
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/mnemosyne-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod body;
pub mod capture;
pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod signal;
pub mod stages;
pub mod types;

pub use capture::{CaptureAdapter, CaptureBody};
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use signal::{CancelOnDrop, CancellationSignal, Cancelled};
pub use stages::{IdempotencyMiddleware, IdempotencyMiddlewareBuilder, ReadFailurePolicy};
pub use types::{empty, full, Body, BoxError, Request, Response, ResponseExt};
