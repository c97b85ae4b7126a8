//! Mnemosyne Sidecar - idempotency caching in front of any HTTP service
//!
//! The sidecar is a standalone reverse proxy. It applies the Mnemosyne
//! idempotency gate to every `POST` and forwards the request to the upstream
//! service, so services written in any language get safe retries without
//! linking the middleware.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                               Pod                                  │
//! │                                                                    │
//! │  ┌──────────────────────┐          ┌────────────────────────────┐  │
//! │  │  Mnemosyne Sidecar   │   HTTP   │    Application Service     │  │
//! │  │                      │ ───────► │                            │  │
//! │  │  POST → gate → proxy │          │  - Business logic only     │  │
//! │  │  other → proxy       │ ◄─────── │  - No retry bookkeeping    │  │
//! │  └──────────┬───────────┘          └────────────────────────────┘  │
//! │             │                                                      │
//! └─────────────┼──────────────────────────────────────────────────────┘
//!               ▼
//!         memory / Redis
//! ```
//!
//! # Endpoints
//!
//! - `/_mnemosyne/health` - liveness
//! - `/_mnemosyne/ready` - readiness; probes the store
//! - `/_mnemosyne/version` - build information
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a configuration file
//! $ mnemosyne-sidecar --config /etc/mnemosyne/sidecar.toml
//!
//! # Run with environment variable overrides
//! $ MNEMOSYNE__UPSTREAM__URL=http://localhost:3000 \
//!   MNEMOSYNE__IDEMPOTENCY__BACKEND=redis \
//!   MNEMOSYNE__IDEMPOTENCY__REDIS_URL=redis://localhost:6379 \
//!   mnemosyne-sidecar
//! ```

#![doc(html_root_url = "https://docs.rs/mnemosyne-sidecar/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod proxy;
pub mod server;
pub mod shutdown;

pub use error::{SidecarError, SidecarResult};
pub use proxy::ProxyClient;
pub use server::{build_gate, SidecarServer, SidecarState};

/// Package name reported by `/_mnemosyne/version`.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Sidecar version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "mnemosyne-sidecar");
    }
}
