//! Timestamp decoding and relative-time labels.
//!
//! Backends in the wild emit RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or epoch
//! milliseconds for the same field; all three decode to `DateTime<Utc>`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp string in any accepted format.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Short label for list previews ("just now", "5m ago", "Mar 04").
#[must_use]
pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..60 => "just now".to_string(),
        60..3_600 => format!("{}m ago", secs / 60),
        3_600..86_400 => format!("{}h ago", secs / 3_600),
        86_400..604_800 => format!("{}d ago", secs / 86_400),
        _ => at.format("%b %d").to_string(),
    }
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = DateTime<Utc>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an RFC 3339 / SQL timestamp string or epoch milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_timestamp(v).ok_or_else(|| E::custom(format!("unrecognized timestamp: {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Utc.timestamp_millis_opt(v)
            .single()
            .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let v = i64::try_from(v).map_err(E::custom)?;
        self.visit_i64(v)
    }
}

/// Serde adapter for required timestamps.
pub mod timestamp {
    use super::{DateTime, Deserializer, Serializer, TimestampVisitor, Utc};

    /// Serialize as RFC 3339.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    /// Deserialize from any accepted format.
    ///
    /// # Errors
    /// Fails on unrecognized input.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        d.deserialize_any(TimestampVisitor)
    }
}

/// Serde adapter for optional timestamps (`null` and empty strings map to `None`).
pub mod timestamp_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{DateTime, Utc, parse_timestamp};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    /// Serialize as RFC 3339 or `null`.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_str(&dt.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    /// Deserialize from any accepted format.
    ///
    /// # Errors
    /// Fails on a malformed value of the wrong JSON type.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<Raw>::deserialize(d)?;
        Ok(match raw {
            Some(Raw::Text(text)) => parse_timestamp(&text),
            Some(Raw::Millis(ms)) => chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single(),
            None => None,
        })
    }
}
