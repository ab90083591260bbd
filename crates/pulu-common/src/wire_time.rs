//! Millisecond timestamps in the Pulse wire format
//!
//! The Pulse API expects placement timestamps as `yyyy-MM-ddTHH:mm:ss.fff`:
//! no offset, exactly three fractional digits, independent of locale.
//! `chrono`'s default RFC 3339 output drops trailing zeros and appends an
//! offset, so fields carrying these values go through this module instead.

use crate::error::{PuluError, Result};
use chrono::NaiveDateTime;

/// strftime pattern for `yyyy-MM-ddTHH:mm:ss.fff`
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Format a timestamp for the wire. Sub-millisecond precision is truncated.
pub fn format(ts: &NaiveDateTime) -> String {
    ts.format(WIRE_FORMAT).to_string()
}

/// Parse a wire timestamp
pub fn parse(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, WIRE_FORMAT)
        .map_err(|_| PuluError::InvalidTimestamp(value.to_string()))
}

/// Serde adapter for `Option<NaiveDateTime>` fields
///
/// Pair with `#[serde(default, skip_serializing_if = "Option::is_none")]`.
pub mod optional {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};

    fn ts(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 13)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_format_keeps_three_fraction_digits() {
        assert_eq!(format(&ts(14, 27, 24, 591)), "2024-08-13T14:27:24.591");
        assert_eq!(format(&ts(0, 0, 0, 0)), "2024-08-13T00:00:00.000");
        assert_eq!(format(&ts(9, 5, 3, 20)), "2024-08-13T09:05:03.020");
    }

    #[test]
    fn test_format_truncates_sub_millisecond() {
        let precise = NaiveDate::from_ymd_opt(2024, 8, 13)
            .unwrap()
            .and_hms_micro_opt(14, 27, 24, 591_999)
            .unwrap();
        assert_eq!(format(&precise), "2024-08-13T14:27:24.591");
    }

    #[test]
    fn test_parse_rejects_offsets_and_garbage() {
        assert!(parse("2024-08-13T14:27:24.591").is_ok());
        assert!(parse("2024-08-13T14:27:24.591Z").is_err());
        assert!(parse("13/08/2024").is_err());
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Body {
        #[serde(with = "optional", default, skip_serializing_if = "Option::is_none")]
        date_time_placed: Option<NaiveDateTime>,
    }

    #[test]
    fn test_optional_field_is_omitted_when_absent() {
        let json = serde_json::to_string(&Body { date_time_placed: None }).unwrap();
        assert_eq!(json, "{}");

        let json = serde_json::to_string(&Body {
            date_time_placed: Some(ts(14, 27, 24, 591)),
        })
        .unwrap();
        assert_eq!(json, r#"{"dateTimePlaced":"2024-08-13T14:27:24.591"}"#);

        let back: Body = serde_json::from_str("{}").unwrap();
        assert!(back.date_time_placed.is_none());
    }
}
