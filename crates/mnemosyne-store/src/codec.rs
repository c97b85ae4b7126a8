//! Binary record codec used by remote backends.
//!
//! Layout: one version byte followed by the bincode encoding of
//! `(body, fingerprint, status, target)`.

use mnemosyne_core::{Fingerprint, Record, FINGERPRINT_LEN, PENDING_STATUS};
use thiserror::Error;

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Errors produced while encoding or decoding a record.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is empty.
    #[error("empty payload")]
    Empty,

    /// The payload was written by an unknown codec version.
    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The payload decoded to a status that is neither pending nor a valid HTTP status.
    #[error("invalid status {0}")]
    InvalidStatus(u16),

    /// The record could not be serialized.
    #[error("failed to encode record: {0}")]
    Encode(String),
}

/// Encodes a record for storage.
pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let wire = (
        record.body(),
        record.fingerprint().as_bytes(),
        record.status(),
        record.target(),
    );
    let size = bincode::serialized_size(&wire).map_err(|e| CodecError::Encode(e.to_string()))?;

    let mut out = Vec::with_capacity(1 + usize::try_from(size).unwrap_or(0));
    out.push(CODEC_VERSION);
    bincode::serialize_into(&mut out, &wire).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a record written by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Record, CodecError> {
    let (&version, payload) = bytes.split_first().ok_or(CodecError::Empty)?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let (body, fingerprint, status, target): (Vec<u8>, [u8; FINGERPRINT_LEN], u16, String) =
        bincode::deserialize(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;

    if status != PENDING_STATUS && !(100..=999).contains(&status) {
        return Err(CodecError::InvalidStatus(status));
    }

    Ok(Record::from_parts(
        target,
        Fingerprint::from_bytes(fingerprint),
        status,
        body,
    ))
}
