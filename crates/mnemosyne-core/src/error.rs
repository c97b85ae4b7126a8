//! Error types for Mnemosyne.
//!
//! Two enums cover the core:
//!
//! - [`StoreError`] - a backend could not complete a `get`/`set`/`insert_if_absent`
//! - [`IdempotencyError`] - every outcome the gate answers on the handler's behalf
//!
//! Each [`IdempotencyError`] maps to an [`ErrorCategory`], and the category maps
//! to the HTTP status the gate responds with:
//!
//! | `ErrorCategory` | Status |
//! |---|---|
//! | `Validation` | 400 |
//! | `MethodNotAllowed` | 405 |
//! | `Conflict` | 409 |
//! | `PayloadTooLarge` | 413 |
//! | `KeyReuse` | 422 |
//! | `Internal` | 500 |
//! | `Unavailable` | 503 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Mismatch;

/// Categories of gate errors for classification and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The idempotency key is missing or malformed.
    Validation,
    /// The method is not eligible for idempotent caching.
    MethodNotAllowed,
    /// Another request with the same key is still in flight.
    Conflict,
    /// The request body exceeds the configured limit.
    PayloadTooLarge,
    /// The key was already used for a different request.
    KeyReuse,
    /// Body read or store write failure.
    Internal,
    /// The store could not be read and the gate is configured to fail closed.
    Unavailable,
}

impl ErrorCategory {
    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::KeyReuse => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` for categories caused by the client's request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal | Self::Unavailable)
    }
}

/// Failure reported by a store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("{backend} store unavailable: {message}")]
    Unavailable {
        /// Backend name (`memory`, `redis`).
        backend: &'static str,
        /// Human-readable cause.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt record under key '{key}': {message}")]
    Corrupt {
        /// The storage key holding the value.
        key: String,
        /// Human-readable cause.
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }

    /// Creates a corrupt-record error.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// An outcome the gate answers itself instead of invoking the handler.
///
/// # Example
///
/// ```
/// use mnemosyne_core::IdempotencyError;
/// use http::StatusCode;
///
/// let error = IdempotencyError::in_flight("order-42");
/// assert_eq!(error.status_code(), StatusCode::CONFLICT);
/// ```
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The request method is not POST.
    #[error("method {method} is not allowed; idempotent requests must use POST")]
    MethodNotAllowed {
        /// The rejected method.
        method: String,
    },

    /// The idempotency key header is absent or blank.
    #[error("missing {header} header")]
    MissingKey {
        /// The configured header name.
        header: String,
    },

    /// The idempotency key header is present but unusable.
    #[error("invalid {header} header: {reason}")]
    InvalidKey {
        /// The configured header name.
        header: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// The request body is larger than the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The request body could not be read.
    #[error("failed to read request body: {message}")]
    BodyRead {
        /// Human-readable cause.
        message: String,
    },

    /// A request with the same key is still being processed.
    #[error("a request with idempotency key '{key}' is still in progress")]
    InFlight {
        /// The idempotency key.
        key: String,
    },

    /// The key was first used for a different request.
    #[error("idempotency key '{key}' was already used for a different request ({mismatch} differs)")]
    KeyReused {
        /// The idempotency key.
        key: String,
        /// What differs.
        mismatch: Mismatch,
    },

    /// The store could not be read and the gate fails closed.
    #[error("idempotency store unavailable")]
    StoreUnavailable {
        /// The underlying store failure (not exposed to clients).
        #[source]
        source: StoreError,
    },

    /// The store rejected a write the gate depends on.
    #[error("failed to persist idempotency record")]
    StoreWrite {
        /// The underlying store failure (not exposed to clients).
        #[source]
        source: StoreError,
    },
}

impl IdempotencyError {
    /// Creates a method-not-allowed error.
    #[must_use]
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            method: method.into(),
        }
    }

    /// Creates a missing-key error.
    #[must_use]
    pub fn missing_key(header: impl Into<String>) -> Self {
        Self::MissingKey {
            header: header.into(),
        }
    }

    /// Creates an invalid-key error.
    #[must_use]
    pub fn invalid_key(header: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            header: header.into(),
            reason: reason.into(),
        }
    }

    /// Creates a body-read error.
    #[must_use]
    pub fn body_read(message: impl Into<String>) -> Self {
        Self::BodyRead {
            message: message.into(),
        }
    }

    /// Creates an in-flight conflict error.
    #[must_use]
    pub fn in_flight(key: impl Into<String>) -> Self {
        Self::InFlight { key: key.into() }
    }

    /// Creates a key-reuse error.
    #[must_use]
    pub fn key_reused(key: impl Into<String>, mismatch: Mismatch) -> Self {
        Self::KeyReused {
            key: key.into(),
            mismatch,
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MethodNotAllowed { .. } => ErrorCategory::MethodNotAllowed,
            Self::MissingKey { .. } | Self::InvalidKey { .. } => ErrorCategory::Validation,
            Self::PayloadTooLarge { .. } => ErrorCategory::PayloadTooLarge,
            Self::InFlight { .. } => ErrorCategory::Conflict,
            Self::KeyReused { .. } => ErrorCategory::KeyReuse,
            Self::BodyRead { .. } | Self::StoreWrite { .. } => ErrorCategory::Internal,
            Self::StoreUnavailable { .. } => ErrorCategory::Unavailable,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::MissingKey { .. } => "IDEMPOTENCY_KEY_MISSING",
            Self::InvalidKey { .. } => "IDEMPOTENCY_KEY_INVALID",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::BodyRead { .. } => "BODY_READ_FAILED",
            Self::InFlight { .. } => "IDEMPOTENCY_KEY_IN_PROGRESS",
            Self::KeyReused { .. } => "IDEMPOTENCY_KEY_REUSED",
            Self::StoreUnavailable { .. } => "IDEMPOTENCY_STORE_UNAVAILABLE",
            Self::StoreWrite { .. } => "IDEMPOTENCY_STORE_WRITE_FAILED",
        }
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// Serializable error envelope for gate responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}
