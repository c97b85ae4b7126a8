//! The cached outcome of an idempotent request.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::Fingerprint;

/// Status value of a record whose response is still being produced.
pub const PENDING_STATUS: u16 = 0;

/// The cached outcome of the first request seen for an idempotency key.
///
/// `target` and `fingerprint` are fixed at creation. `status` leaves
/// [`PENDING_STATUS`] exactly once, on the first status write, and `body`
/// only grows while that single production run lasts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    target: String,
    fingerprint: Fingerprint,
    status: u16,
    body: Vec<u8>,
}

/// Which part of a request disagrees with a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// The request-target differs.
    Target,
    /// The body fingerprint differs.
    Fingerprint,
    /// Both differ.
    Both,
}

impl Mismatch {
    /// Short label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Fingerprint => "fingerprint",
            Self::Both => "target and fingerprint",
        }
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Record {
    /// Creates a pending record for a request about to be executed.
    #[must_use]
    pub fn pending(target: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            target: target.into(),
            fingerprint,
            status: PENDING_STATUS,
            body: Vec::new(),
        }
    }

    /// Reassembles a record from stored parts.
    #[must_use]
    pub fn from_parts(
        target: impl Into<String>,
        fingerprint: Fingerprint,
        status: u16,
        body: Vec<u8>,
    ) -> Self {
        Self {
            target: target.into(),
            fingerprint,
            status,
            body,
        }
    }

    /// Returns the request-target first associated with the key.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the fingerprint of the original request body.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Returns the raw status; [`PENDING_STATUS`] while pending.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns the settled status as an HTTP status code.
    ///
    /// `None` while pending or if the stored value is not a valid status.
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        if self.is_pending() {
            return None;
        }
        StatusCode::from_u16(self.status).ok()
    }

    /// Returns the bytes produced so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` while no status has been written.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.status == PENDING_STATUS
    }

    /// Records the response status.
    ///
    /// Only the first call has an effect; returns whether the status changed.
    pub fn settle(&mut self, status: StatusCode) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = status.as_u16();
        true
    }

    /// Appends response bytes.
    pub fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Compares a request against this record.
    ///
    /// Returns `None` when both target and fingerprint match.
    #[must_use]
    pub fn mismatch(&self, target: &str, fingerprint: &Fingerprint) -> Option<Mismatch> {
        match (self.target != target, self.fingerprint != *fingerprint) {
            (false, false) => None,
            (true, false) => Some(Mismatch::Target),
            (false, true) => Some(Mismatch::Fingerprint),
            (true, true) => Some(Mismatch::Both),
        }
    }

    /// Decomposes the record into `(target, fingerprint, status, body)`.
    #[must_use]
    pub fn into_parts(self) -> (String, Fingerprint, u16, Vec<u8>) {
        (self.target, self.fingerprint, self.status, self.body)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("target", &self.target)
            .field("fingerprint", &self.fingerprint)
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish()
    }
}
