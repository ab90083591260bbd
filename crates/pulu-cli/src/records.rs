//! Record model
//!
//! Input records come in two kinds, one per processing mode. Both expose a
//! natural key built from their identifying fields; the ledger uses it to
//! decide whether a record already succeeded in an earlier run.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between identifying fields in a natural key
pub const KEY_SEPARATOR: char = '|';

/// Product code that addresses every product of a donation
pub const ALL_PRODUCTS: &str = "ALL";

/// Which kind of record a run processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Clear donation holds
    #[default]
    Hold,
    /// Clear discard fates
    Discard,
}

impl ProcessingMode {
    /// Banner title for this mode
    pub fn title(self) -> &'static str {
        match self {
            ProcessingMode::Hold => "PULU01 - Donation Hold Clearing Utility",
            ProcessingMode::Discard => "PULU01 - Discard Fate Clearing Utility",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::Hold => f.write_str("hold"),
            ProcessingMode::Discard => f.write_str("discard"),
        }
    }
}

/// A hold placed on a donation product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldRecord {
    pub donation_number: String,
    pub product_code: String,
    pub hold_code: String,
    pub hold_date_time: Option<NaiveDateTime>,
}

impl HoldRecord {
    pub fn new(
        donation_number: impl Into<String>,
        product_code: impl Into<String>,
        hold_code: impl Into<String>,
        hold_date_time: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            donation_number: donation_number.into(),
            product_code: product_code.into(),
            hold_code: hold_code.into(),
            hold_date_time,
        }
    }

    pub fn key(&self) -> String {
        natural_key(&self.donation_number, &self.product_code, &self.hold_code)
    }

    /// Product code must be 4 characters unless it is the `ALL` sentinel;
    /// hold codes are at least two characters.
    pub fn is_valid(&self) -> bool {
        let product = self.product_code.trim();
        is_key_field(&self.donation_number)
            && is_key_field(product)
            && (product.chars().count() == 4 || product.eq_ignore_ascii_case(ALL_PRODUCTS))
            && is_key_field(&self.hold_code)
            && self.hold_code.trim().chars().count() > 1
    }
}

/// A discard fate recorded against a unit at a location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardRecord {
    pub unit_number: String,
    pub product_code: String,
    pub location_code: String,
    pub placed_at: Option<NaiveDateTime>,
    pub hold_code: Option<String>,
}

impl DiscardRecord {
    pub fn new(
        unit_number: impl Into<String>,
        product_code: impl Into<String>,
        location_code: impl Into<String>,
    ) -> Self {
        Self {
            unit_number: unit_number.into(),
            product_code: product_code.into(),
            location_code: location_code.into(),
            placed_at: None,
            hold_code: None,
        }
    }

    pub fn with_placed_at(mut self, placed_at: Option<NaiveDateTime>) -> Self {
        self.placed_at = placed_at;
        self
    }

    pub fn with_hold_code(mut self, hold_code: Option<String>) -> Self {
        self.hold_code = hold_code.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn key(&self) -> String {
        natural_key(&self.unit_number, &self.product_code, &self.location_code)
    }

    pub fn is_valid(&self) -> bool {
        is_key_field(&self.unit_number)
            && is_key_field(&self.product_code)
            && is_key_field(&self.location_code)
    }
}

/// Non-empty and free of the key separator, so keys stay unambiguous
fn is_key_field(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.contains(KEY_SEPARATOR)
}

fn natural_key(identifier: &str, product: &str, qualifier: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        identifier.trim(),
        product.trim(),
        qualifier.trim(),
        sep = KEY_SEPARATOR
    )
}

/// One input record of either kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Hold(HoldRecord),
    Discard(DiscardRecord),
}

impl Record {
    /// Deterministic key over the identifying fields
    pub fn key(&self) -> String {
        match self {
            Record::Hold(r) => r.key(),
            Record::Discard(r) => r.key(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Record::Hold(r) => r.is_valid(),
            Record::Discard(r) => r.is_valid(),
        }
    }

    pub fn mode(&self) -> ProcessingMode {
        match self {
            Record::Hold(_) => ProcessingMode::Hold,
            Record::Discard(_) => ProcessingMode::Discard,
        }
    }

    /// Donation number for holds, unit number for discards
    pub fn unit_number(&self) -> &str {
        match self {
            Record::Hold(r) => &r.donation_number,
            Record::Discard(r) => &r.unit_number,
        }
    }

    pub fn product_code(&self) -> &str {
        match self {
            Record::Hold(r) => &r.product_code,
            Record::Discard(r) => &r.product_code,
        }
    }

    pub fn placed_at(&self) -> Option<NaiveDateTime> {
        match self {
            Record::Hold(r) => r.hold_date_time,
            Record::Discard(r) => r.placed_at,
        }
    }
}

impl From<HoldRecord> for Record {
    fn from(record: HoldRecord) -> Self {
        Record::Hold(record)
    }
}

impl From<DiscardRecord> for Record {
    fn from(record: DiscardRecord) -> Self {
        Record::Discard(record)
    }
}

/// Outcome of processing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Success,
    Failed,
    Skipped,
}

/// Immutable result for one record in one run
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    record: Record,
    status: ProcessingStatus,
    error_message: Option<String>,
    completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    pub fn success(record: Record) -> Self {
        Self::new(record, ProcessingStatus::Success, None)
    }

    pub fn failure(record: Record, error_message: impl Into<String>) -> Self {
        Self::new(record, ProcessingStatus::Failed, Some(error_message.into()))
    }

    pub fn skipped(record: Record) -> Self {
        Self::new(record, ProcessingStatus::Skipped, None)
    }

    fn new(record: Record, status: ProcessingStatus, error_message: Option<String>) -> Self {
        Self {
            record,
            status,
            error_message,
            completed_at: Utc::now(),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    pub fn has_error(&self) -> bool {
        self.error_message.as_deref().is_some_and(|m| !m.is_empty())
    }
}
