//! Human-readable durations (`"500ms"`, `"30s"`, `"1h 30m"`, `"1day"`).
//!
//! Used as `#[serde(with = "crate::duration")]` on `Duration` fields and by the
//! environment override parser.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serializes a duration in humantime form.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Deserializes a duration from its humantime form.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parses a humantime duration. A bare integer means seconds.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
}
