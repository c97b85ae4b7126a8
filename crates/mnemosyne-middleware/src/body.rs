//! Request body tee.
//!
//! Reads the request body frame by frame, feeding each data frame to a
//! [`FingerprintHasher`] and to the buffer the handler later reads from.

use bytes::{Bytes, BytesMut};
use http_body::Body as _;
use http_body_util::BodyExt;
use mnemosyne_core::{Fingerprint, FingerprintHasher, IdempotencyError};

use crate::types::Body;

/// A fully read request body and its digest.
#[derive(Debug, Clone)]
pub struct BufferedBody {
    /// The body bytes, handed back to the handler.
    pub bytes: Bytes,
    /// SHA-256 of `bytes`.
    pub fingerprint: Fingerprint,
}

/// Reads `body` to the end, hashing as it goes.
///
/// # Errors
///
/// - `PayloadTooLarge` once more than `limit` bytes have arrived (or the
///   body announces more up front)
/// - `BodyRead` if the body yields an error
pub async fn tee_body(mut body: Body, limit: usize) -> Result<BufferedBody, IdempotencyError> {
    let hint = body.size_hint();
    if usize::try_from(hint.lower()).map_or(true, |lower| lower > limit) {
        return Err(IdempotencyError::PayloadTooLarge { limit });
    }

    let initial = hint
        .exact()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);
    let mut buffer = BytesMut::with_capacity(initial);
    let mut hasher = FingerprintHasher::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| IdempotencyError::body_read(e.to_string()))?;
        let Ok(data) = frame.into_data() else {
            // trailers
            continue;
        };
        if buffer.len() + data.len() > limit {
            return Err(IdempotencyError::PayloadTooLarge { limit });
        }
        hasher.update(&data);
        buffer.extend_from_slice(&data);
    }

    Ok(BufferedBody {
        bytes: buffer.freeze(),
        fingerprint: hasher.finish(),
    })
}
