//! Serde codec for API timestamps.
//!
//! The API writes timestamps as `YYYY-MM-DDTHH:MM:SS` in UTC without an
//! offset; some endpoints use full RFC 3339 instead. Both are accepted.
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Snapshot {
//!     #[serde(with = "cirrus::timestamp")]
//!     created: DateTime<Utc>,
//!     #[serde(default, with = "cirrus::timestamp::option")]
//!     finished: Option<DateTime<Utc>>,
//! }
//!
//! let s: Snapshot = serde_json::from_str(r#"{"created": "2024-03-01T12:30:00", "finished": null}"#).unwrap();
//! assert_eq!(s.created.to_rfc3339(), "2024-03-01T12:30:00+00:00");
//! assert!(s.finished.is_none());
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// The layout the API uses when writing timestamps.
pub const LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses an API timestamp.
pub fn parse(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, LAYOUT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
}

/// Formats a timestamp the way the API writes it.
pub fn format(value: &DateTime<Utc>) -> String {
    value.format(LAYOUT).to_string()
}

pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(value))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(|e| {
        serde::de::Error::custom(format_args!("invalid timestamp '{}': {}", raw, e))
    })
}

/// The same codec for `Option<DateTime<Utc>>`, mapping `null` to `None`.
pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => super::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| {
                parse(&raw).map_err(|e| {
                    serde::de::Error::custom(format_args!("invalid timestamp '{}': {}", raw, e))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parses_both_layouts() {
        let expected = Utc.with_ymd_and_hms(2018, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse("2018-01-02T03:04:05").unwrap(), expected);
        assert_eq!(parse("2018-01-02T03:04:05Z").unwrap(), expected);
        assert_eq!(parse("2018-01-02T05:04:05+02:00").unwrap(), expected);
        assert!(parse("yesterday").is_err());
    }

    #[test]
    fn test_round_trips_in_api_layout() {
        let at = Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(format(&at), "2020-12-31T23:59:59");
    }
}
