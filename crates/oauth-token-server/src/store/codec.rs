//! Field encodings shared by all record tables.
//!
//! Strings are raw UTF-8 bytes, scope sets are comma-joined member names and
//! timestamps use the Go `time.Time.MarshalBinary` layout so existing databases
//! stay readable.

use chrono::{DateTime, Utc};

use super::records::ScopeSet;
use crate::error::{StoreError, StoreResult};

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_TO_INTERNAL: i64 = 62_135_596_800;

const TIME_V1: u8 = 1;
const TIME_V2: u8 = 2;
const TIME_V1_LEN: usize = 15;
const TIME_V2_LEN: usize = 16;
/// Zone offset marker for UTC.
const UTC_OFFSET: i16 = -1;

/// Separator between scope names in stored sets.
pub const SCOPE_SEPARATOR: char = ',';

/// Decode a string field; a missing field is the empty string.
pub fn decode_string(field: &'static str, bytes: Option<Vec<u8>>) -> StoreResult<String> {
    match bytes {
        None => Ok(String::new()),
        Some(bytes) => {
            String::from_utf8(bytes).map_err(|e| StoreError::corrupt(field, e.to_string()))
        }
    }
}

/// Encode a scope set as comma-joined members.
#[must_use]
pub fn encode_scopes(scopes: &ScopeSet) -> String {
    scopes.iter().collect::<Vec<_>>().join(",")
}

/// Decode a stored scope set by splitting on commas.
///
/// A present but empty field decodes to `{""}`, the set holding only the empty
/// scope, so a request without `scope` stays authorized for that grant.
pub fn decode_scopes(field: &'static str, bytes: Option<Vec<u8>>) -> StoreResult<Option<ScopeSet>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let joined = decode_string(field, Some(bytes))?;
    Ok(Some(joined.split(SCOPE_SEPARATOR).collect()))
}

/// Encode an instant in the Go binary time layout (version 1, UTC).
#[must_use]
pub fn encode_time(at: &DateTime<Utc>) -> Vec<u8> {
    let seconds = at.timestamp() + UNIX_TO_INTERNAL;
    let nanos = at.timestamp_subsec_nanos() as i32;

    let mut buf = Vec::with_capacity(TIME_V1_LEN);
    buf.push(TIME_V1);
    buf.extend_from_slice(&seconds.to_be_bytes());
    buf.extend_from_slice(&nanos.to_be_bytes());
    buf.extend_from_slice(&UTC_OFFSET.to_be_bytes());
    buf
}

/// Decode an instant from the Go binary time layout.
///
/// The zone offset only affects presentation in Go; the instant is absolute.
pub fn decode_time(field: &'static str, bytes: &[u8]) -> StoreResult<DateTime<Utc>> {
    let expected = match bytes.first() {
        Some(&TIME_V1) => TIME_V1_LEN,
        Some(&TIME_V2) => TIME_V2_LEN,
        Some(version) => {
            return Err(StoreError::corrupt(field, format!("unsupported time version {version}")));
        }
        None => return Err(StoreError::corrupt(field, "empty time value")),
    };
    if bytes.len() != expected {
        return Err(StoreError::corrupt(
            field,
            format!("time value has {} bytes, expected {expected}", bytes.len()),
        ));
    }

    let mut seconds = [0u8; 8];
    seconds.copy_from_slice(&bytes[1..9]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&bytes[9..13]);

    let seconds = i64::from_be_bytes(seconds) - UNIX_TO_INTERNAL;
    let nanos = i32::from_be_bytes(nanos);
    let nanos = u32::try_from(nanos)
        .ok()
        .filter(|n| *n < 1_000_000_000)
        .ok_or_else(|| StoreError::corrupt(field, format!("nanoseconds out of range: {nanos}")))?;

    DateTime::from_timestamp(seconds, nanos)
        .ok_or_else(|| StoreError::corrupt(field, "instant out of range"))
}

/// Decode an optional timestamp; a missing field is `None`.
pub fn decode_optional_time(
    field: &'static str,
    bytes: Option<Vec<u8>>,
) -> StoreResult<Option<DateTime<Utc>>> {
    bytes.map(|bytes| decode_time(field, &bytes)).transpose()
}

/// The Go zero instant, 0001-01-01T00:00:00Z.
#[must_use]
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(-UNIX_TO_INTERNAL, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
