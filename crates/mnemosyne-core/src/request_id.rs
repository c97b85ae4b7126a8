//! Request identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a request flowing through the gate.
///
/// Uses UUID v7, so identifiers sort by creation time and can be correlated
/// across the gate's log lines for one request.
///
/// # Example
///
/// ```
/// use mnemosyne_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a request ID forwarded by a client or proxy.
    ///
    /// Returns `None` when the value is not a UUID.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_id_is_version_7() {
        assert_eq!(RequestId::new().as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_parse_forwarded_id() {
        let id = RequestId::new();
        let parsed = RequestId::parse(&format!(" {id} ")).expect("valid uuid");
        assert_eq!(parsed, id);
        assert!(RequestId::parse("not-a-uuid").is_none());
    }
}
