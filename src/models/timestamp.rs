//! Seconds-since-epoch codec for timestamps.
//!
//! Every boundary (document store, relay payloads, HTTP) carries dates as a
//! floating point number of seconds. Values are kept at millisecond precision
//! so they survive the numeric round trip unchanged.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Current time truncated to whole milliseconds.
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis()).unwrap_or_else(Utc::now)
}

/// Convert a timestamp to seconds since the Unix epoch.
pub fn to_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

/// Convert seconds since the Unix epoch to a timestamp.
pub fn from_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    from_millis(millis as i64)
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// `#[serde(with = "seconds")]` adapter for `DateTime<Utc>` fields.
pub mod seconds {
    use super::*;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_seconds(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        from_seconds(secs)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", secs)))
    }
}

/// Serializer for optional timestamps; `None` is written as `null`.
pub mod optional_seconds {
    use super::*;

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&to_seconds(dt)),
            None => serializer.serialize_none(),
        }
    }
}
