pub(crate) mod error;
pub(crate) mod named_locks;

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use ring::digest;

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
pub(crate) fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time is valid")
        .as_millis() as u64
}

/// Parses the bytes into a string.
pub(crate) fn string_from_bytes(
    bytes: &[u8],
) -> Result<String, std::string::FromUtf8Error> {
    String::from_utf8(bytes.to_vec())
}

/// SHA-256 of the given canonical serialization, rendered as an unpadded
/// base64url string. This is the wire form of token content hashes.
pub(crate) fn calculate_hash(bytes: &[u8]) -> String {
    let hash = digest::digest(&digest::SHA256, bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Renders epoch milliseconds as an RFC 3339 timestamp in UTC.
///
/// Returns `None` for values outside chrono's representable range, which can
/// only come from a corrupted stored value.
pub(crate) fn millis_to_iso8601(millis: u64) -> Option<String> {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parses an RFC 3339 timestamp into epoch milliseconds.
pub(crate) fn iso8601_to_millis(value: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
}

#[cfg(test)]
mod tests {
    use super::{iso8601_to_millis, millis_to_iso8601};

    #[test]
    fn iso8601_round_trip() {
        let millis = 1_700_000_000_123;

        let rendered = millis_to_iso8601(millis)
            .expect("rendering a sane timestamp should succeed");

        assert_eq!(rendered, "2023-11-14T22:13:20.123Z");
        assert_eq!(iso8601_to_millis(&rendered), Some(millis));
    }

    #[test]
    fn iso8601_rejects_garbage() {
        assert_eq!(iso8601_to_millis("soon"), None);
        assert_eq!(iso8601_to_millis("2023-13-99T00:00:00Z"), None);
    }
}
