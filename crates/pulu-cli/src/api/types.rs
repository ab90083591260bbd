//! API request and response types
//!
//! Matches the Pulse clearing API: camelCase JSON, placement timestamps in
//! the millisecond wire format.

use crate::records::{DiscardRecord, HoldRecord};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Program identifier reported to the Pulse API
pub const PROGRAM_ID: &str = "PULS11";

/// How a hold is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearType {
    Direct,
}

/// Body of a clear-hold request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearHoldRequest {
    pub unit_number: String,
    pub product_code: String,
    pub hold_code: String,
    pub clear_code: String,
    pub program_id: String,
    #[serde(
        with = "pulu_common::wire_time::optional",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time_placed: Option<NaiveDateTime>,
    pub incident_number: String,
    pub clear_constituents: bool,
    pub clear_type: ClearType,
    #[serde(rename = "calledFromDT")]
    pub called_from_dt: bool,
    pub called_from_validation: bool,
}

impl ClearHoldRequest {
    /// Build the request for one hold; identifiers are trimmed and upper-cased
    pub fn from_record(record: &HoldRecord, clear_code: &str) -> Self {
        Self {
            unit_number: record.donation_number.trim().to_uppercase(),
            product_code: record.product_code.trim().to_uppercase(),
            hold_code: record.hold_code.trim().to_string(),
            clear_code: clear_code.to_string(),
            program_id: PROGRAM_ID.to_string(),
            date_time_placed: record.hold_date_time,
            incident_number: String::new(),
            clear_constituents: true,
            clear_type: ClearType::Direct,
            called_from_dt: false,
            called_from_validation: false,
        }
    }

    /// Whether the hold addresses every product of the donation
    pub fn is_all_products(&self) -> bool {
        self.product_code == crate::records::ALL_PRODUCTS
    }
}

/// Body of a clear-discard-fate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearDiscardFateRequest {
    pub unit_number: String,
    pub product_code: String,
    pub location_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_code: Option<String>,
    pub clear_code: String,
    pub program_id: String,
    #[serde(
        with = "pulu_common::wire_time::optional",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time_placed: Option<NaiveDateTime>,
}

impl ClearDiscardFateRequest {
    pub fn from_record(record: &DiscardRecord, clear_code: &str) -> Self {
        Self {
            unit_number: record.unit_number.trim().to_uppercase(),
            product_code: record.product_code.trim().to_uppercase(),
            location_code: record.location_code.trim().to_string(),
            hold_code: record.hold_code.as_ref().map(|c| c.trim().to_string()),
            clear_code: clear_code.to_string(),
            program_id: PROGRAM_ID.to_string(),
            date_time_placed: record.placed_at,
        }
    }
}

/// Outcome reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearStatus {
    Cleared,
    IgnoredAlreadyCleared,
    NotClearedIndirectHoldDoesNotExist,
    Error,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl ClearStatus {
    /// Fallback message when the API gives none
    pub fn describe(&self) -> &'static str {
        match self {
            ClearStatus::Cleared => "Cleared",
            ClearStatus::IgnoredAlreadyCleared => "Ignored: already cleared",
            ClearStatus::NotClearedIndirectHoldDoesNotExist => {
                "Not cleared: indirect hold does not exist"
            }
            ClearStatus::Error => "API reported an error",
            ClearStatus::Unknown => "Unknown API status",
        }
    }
}

/// Response body shared by both clearing endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResponse {
    pub status: ClearStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_number"
    )]
    pub error_number: Option<i64>,
}

impl ClearResponse {
    pub fn is_cleared(&self) -> bool {
        self.status == ClearStatus::Cleared
    }

    /// The API's message, or a description of the status
    pub fn failure_message(&self) -> String {
        match self.error_message.as_deref().map(str::trim) {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => self.status.describe().to_string(),
        }
    }
}

/// Accept numbers, numeric strings, or null for `errorNumber`
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_hold_request_wire_shape() {
        let placed = NaiveDate::from_ymd_opt(2024, 8, 13)
            .unwrap()
            .and_hms_milli_opt(14, 27, 24, 591)
            .unwrap();
        let record = HoldRecord::new(" g0956250001234a ", "prod", "H01", Some(placed));

        let body = serde_json::to_value(ClearHoldRequest::from_record(&record, "RD")).unwrap();
        assert_eq!(
            body,
            json!({
                "unitNumber": "G0956250001234A",
                "productCode": "PROD",
                "holdCode": "H01",
                "clearCode": "RD",
                "programId": "PULS11",
                "dateTimePlaced": "2024-08-13T14:27:24.591",
                "incidentNumber": "",
                "clearConstituents": true,
                "clearType": "Direct",
                "calledFromDT": false,
                "calledFromValidation": false
            })
        );
    }

    #[test]
    fn test_hold_request_without_timestamp_omits_field() {
        let record = HoldRecord::new("G1", "ALL", "H01", None);
        let request = ClearHoldRequest::from_record(&record, "RD");
        assert!(request.is_all_products());
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("dateTimePlaced").is_none());
    }

    #[test]
    fn test_discard_request_wire_shape() {
        let record = DiscardRecord::new("u100", "e0791", "LAB1");
        let body = serde_json::to_value(ClearDiscardFateRequest::from_record(&record, "DF")).unwrap();
        assert_eq!(
            body,
            json!({
                "unitNumber": "U100",
                "productCode": "E0791",
                "locationCode": "LAB1",
                "clearCode": "DF",
                "programId": "PULS11"
            })
        );
    }

    #[test]
    fn test_response_statuses() {
        let cleared: ClearResponse = serde_json::from_str(r#"{"status":"Cleared"}"#).unwrap();
        assert!(cleared.is_cleared());

        let ignored: ClearResponse = serde_json::from_str(
            r#"{"status":"IgnoredAlreadyCleared","errorMessage":"Hold already cleared","errorNumber":2001}"#,
        )
        .unwrap();
        assert!(!ignored.is_cleared());
        assert_eq!(ignored.failure_message(), "Hold already cleared");
        assert_eq!(ignored.error_number, Some(2001));
    }

    #[test]
    fn test_unknown_status_and_loose_error_number() {
        let response: ClearResponse =
            serde_json::from_str(r#"{"status":"PartiallyCleared","errorNumber":"17"}"#).unwrap();
        assert_eq!(response.status, ClearStatus::Unknown);
        assert_eq!(response.error_number, Some(17));
        assert_eq!(response.failure_message(), "Unknown API status");
    }

    #[test]
    fn test_missing_status_is_rejected() {
        assert!(serde_json::from_str::<ClearResponse>(r#"{"errorMessage":"x"}"#).is_err());
    }
}
