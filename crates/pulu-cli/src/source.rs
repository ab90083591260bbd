//! CSV record source
//!
//! Reads the input file into validated records. The first non-empty line
//! decides the layout:
//!
//! - **Named**: a header row using the Pulse extract column names
//!   (`DNTNO`, `HDATE`, `HTIME`, `PRDCD`, `RSHLD`, `LOCCD`), matched
//!   case-insensitively and in any order. Missing required columns abort
//!   the read with [`CliError::Schema`].
//! - **Legacy**: any other header row, or no header at all. Fields are
//!   positional: identifier, product code, hold code (or location code for
//!   discards), with no placement time.
//!
//! Bad data lines are counted and dropped; they never abort the read.

use crate::error::{CliError, Result};
use crate::records::{DiscardRecord, HoldRecord, ProcessingMode, Record};
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Donation / unit number
pub const COL_DONATION: &str = "DNTNO";
/// Placement date, `YYYYMMDD`
pub const COL_DATE: &str = "HDATE";
/// Placement time, `HHMMSS[fff]`
pub const COL_TIME: &str = "HTIME";
/// Product code
pub const COL_PRODUCT: &str = "PRDCD";
/// Hold code
pub const COL_HOLD: &str = "RSHLD";
/// Location code
pub const COL_LOCATION: &str = "LOCCD";

/// Columns a named hold header must carry
pub const HOLD_REQUIRED: &[&str] = &[COL_DONATION, COL_DATE, COL_TIME, COL_PRODUCT, COL_HOLD];

/// Columns a named discard header must carry
pub const DISCARD_REQUIRED: &[&str] = &[COL_DONATION, COL_PRODUCT, COL_LOCATION];

const KNOWN_COLUMNS: &[&str] = &[COL_DONATION, COL_DATE, COL_TIME, COL_PRODUCT, COL_HOLD, COL_LOCATION];

/// Field count of the positional layout
pub const LEGACY_WIDTH: usize = 3;

/// How data lines map onto record fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Positional `identifier, product, hold|location`
    Legacy,
    /// Header-named columns
    Named {
        /// Upper-cased column name -> field index
        columns: HashMap<String, usize>,
        /// Field count every data line must match
        width: usize,
    },
}

impl Layout {
    fn width(&self) -> usize {
        match self {
            Layout::Legacy => LEGACY_WIDTH,
            Layout::Named { width, .. } => *width,
        }
    }

    fn field<'a>(&self, row: &'a StringRecord, name: &str) -> Option<&'a str> {
        match self {
            Layout::Legacy => None,
            Layout::Named { columns, .. } => columns.get(name).and_then(|&i| row.get(i)),
        }
    }
}

/// Records read from one input file
#[derive(Debug)]
pub struct SourceReport {
    pub records: Vec<Record>,
    /// Lines dropped for a wrong field count or failed validation
    pub invalid: usize,
    pub layout: Layout,
}

/// Read and validate every record in `path`
pub fn parse(path: impl AsRef<Path>, mode: ProcessingMode) -> Result<SourceReport> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CliError::FileNotFound(path.display().to_string()),
        _ => CliError::Io(e),
    })?;

    info!(file = %path.display(), mode = %mode, "Reading CSV file");
    parse_reader(file, mode, &path.display().to_string())
}

/// Parse records from any reader; `source_name` is used in errors and logs
pub fn parse_reader<R: Read>(reader: R, mode: ProcessingMode, source_name: &str) -> Result<SourceReport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut layout: Option<Layout> = None;
    let mut records = Vec::new();
    let mut invalid = 0usize;

    for row in csv_reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(CliError::Csv(e)),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable line");
                invalid += 1;
                continue;
            }
        };

        if row.iter().all(str::is_empty) {
            continue;
        }

        let line = row.position().map(|p| p.line()).unwrap_or_default();

        let current = match layout {
            Some(ref layout) => layout,
            None => {
                let cells: Vec<&str> = row.iter().collect();
                if looks_like_header(&cells) {
                    let detected = detect_layout(&cells, mode, source_name)?;
                    info!(layout = ?detected, "Detected header row");
                    layout = Some(detected);
                    continue;
                }
                debug!("No header row, using positional layout");
                &*layout.insert(Layout::Legacy)
            }
        };

        if row.len() != current.width() {
            warn!(line, expected = current.width(), found = row.len(), "Wrong field count");
            invalid += 1;
            continue;
        }

        let record = build_record(current, &row, mode);
        if record.is_valid() {
            records.push(record);
        } else {
            warn!(line, key = %record.key(), "Invalid record format");
            invalid += 1;
        }
    }

    info!(valid = records.len(), invalid, "CSV parsing completed");

    Ok(SourceReport {
        records,
        invalid,
        layout: layout.unwrap_or(Layout::Legacy),
    })
}

/// A header row has only alphabetic name cells: no digits, nothing empty
///
/// Data rows always carry a donation number, and donation numbers always
/// contain digits.
pub fn looks_like_header(cells: &[&str]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty()
                && cell.chars().any(char::is_alphabetic)
                && !cell.chars().any(|c| c.is_ascii_digit())
        })
}

fn detect_layout(cells: &[&str], mode: ProcessingMode, source_name: &str) -> Result<Layout> {
    let columns: HashMap<String, usize> = cells
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_ascii_uppercase(), i))
        .collect();

    if !KNOWN_COLUMNS.iter().any(|name| columns.contains_key(*name)) {
        if cells.len() != LEGACY_WIDTH {
            warn!(columns = cells.len(), "Unrecognised header; data lines must have 3 fields");
        }
        return Ok(Layout::Legacy);
    }

    let required = match mode {
        ProcessingMode::Hold => HOLD_REQUIRED,
        ProcessingMode::Discard => DISCARD_REQUIRED,
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|name| !columns.contains_key(**name))
        .map(|name| name.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(CliError::schema(source_name, missing, required));
    }

    Ok(Layout::Named {
        columns,
        width: cells.len(),
    })
}

fn build_record(layout: &Layout, row: &StringRecord, mode: ProcessingMode) -> Record {
    let at = |i: usize| row.get(i).unwrap_or_default().to_string();

    match (layout, mode) {
        (Layout::Legacy, ProcessingMode::Hold) => HoldRecord::new(at(0), at(1), at(2), None).into(),
        (Layout::Legacy, ProcessingMode::Discard) => DiscardRecord::new(at(0), at(1), at(2)).into(),
        (named, mode) => {
            let get = |name: &str| named.field(row, name).unwrap_or_default().to_string();
            let placed_at = match (named.field(row, COL_DATE), named.field(row, COL_TIME)) {
                (Some(date), Some(time)) => combine(date, time),
                _ => None,
            };

            match mode {
                ProcessingMode::Hold => {
                    HoldRecord::new(get(COL_DONATION), get(COL_PRODUCT), get(COL_HOLD), placed_at).into()
                }
                ProcessingMode::Discard => {
                    DiscardRecord::new(get(COL_DONATION), get(COL_PRODUCT), get(COL_LOCATION))
                        .with_placed_at(placed_at)
                        .with_hold_code(named.field(row, COL_HOLD).map(str::to_string))
                        .into()
                }
            }
        }
    }
}

/// Combine `YYYYMMDD` and `HHMMSS[fff]` into one timestamp
///
/// Digits after the seconds are a decimal fraction, kept to millisecond
/// precision (`1427245` is 14:27:24.500). Returns `None` for anything
/// malformed rather than failing the line.
pub fn combine(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = date.trim();
    let time = time.trim();

    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !(6..=9).contains(&time.len()) || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let day = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;

    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let second: u32 = time[4..6].parse().ok()?;
    let millis: u32 = match &time[6..] {
        "" => 0,
        frac => format!("{:0<3}", &frac[..frac.len().min(3)]).parse().ok()?,
    };

    day.and_hms_milli_opt(hour, minute, second, millis)
}
