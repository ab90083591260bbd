//! `pulu01 generate` command implementation
//!
//! Writes synthetic hold records in the named-column layout for load
//! testing. Output is deterministic: the same count always produces the same
//! file.

use crate::error::{CliError, Result};
use crate::source::{COL_DATE, COL_DONATION, COL_HOLD, COL_PRODUCT, COL_TIME};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use colored::Colorize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

const DONATION_PREFIX: &str = "G095625";
const PRODUCT_CODES: &[&str] = &["PROD", "GIFT", "DONA", "MEMB", "EVEN", "ITEM"];
const HOLD_CODES: &[&str] = &["H01", "H02", "H03", "H04", "H05", "SUS", "REV", "CHK"];
const CHECK_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest count the six-digit sequence can hold
pub const MAX_COUNT: usize = 999_999;

/// One generated row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedRow {
    pub donation_number: String,
    pub placed_at: NaiveDateTime,
    pub product_code: &'static str,
    pub hold_code: &'static str,
}

/// Build row `sequence` (1-based)
pub fn row(sequence: usize) -> GeneratedRow {
    let digest = Sha256::digest(sequence.to_le_bytes());
    let pick = |byte: u8, len: usize| usize::from(byte) % len;

    let check = CHECK_CHARS[pick(digest[0], CHECK_CHARS.len())] as char;
    let base = NaiveDate::from_ymd_opt(2024, 8, 13)
        .and_then(|d| d.and_hms_opt(6, 0, 0))
        .unwrap_or_default();
    let offset_ms = i64::try_from(sequence).unwrap_or(i64::MAX / 2_000).saturating_mul(1_731);

    GeneratedRow {
        donation_number: format!("{}{:06}{}", DONATION_PREFIX, sequence, check),
        placed_at: base + Duration::milliseconds(offset_ms),
        product_code: PRODUCT_CODES[pick(digest[1], PRODUCT_CODES.len())],
        hold_code: HOLD_CODES[pick(digest[2], HOLD_CODES.len())],
    }
}

/// Write `count` rows to `output`
pub fn write_file(count: usize, output: &Path) -> Result<()> {
    if count == 0 || count > MAX_COUNT {
        return Err(CliError::config(format!(
            "record count must be between 1 and {}, got {}",
            MAX_COUNT, count
        )));
    }

    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record([COL_DONATION, COL_DATE, COL_TIME, COL_PRODUCT, COL_HOLD])?;

    for sequence in 1..=count {
        let row = row(sequence);
        let date = row.placed_at.format("%Y%m%d").to_string();
        let time = row.placed_at.format("%H%M%S%3f").to_string();
        writer.write_record([
            row.donation_number.as_str(),
            date.as_str(),
            time.as_str(),
            row.product_code,
            row.hold_code,
        ])?;
    }
    writer.flush()?;

    Ok(())
}

/// Generate test data and print a short report
pub async fn run(count: usize, output: &Path) -> Result<()> {
    println!("Generating {} test records...", crate::progress::format_count(count));

    let path = output.to_path_buf();
    tokio::task::spawn_blocking(move || write_file(count, &path))
        .await
        .map_err(|e| CliError::Other(e.into()))??;

    let size = tokio::fs::metadata(output).await?.len();
    info!(count, output = %output.display(), size, "Generated test data");

    println!(
        "{} Generated {} records in {}",
        "✓".green().bold(),
        crate::progress::format_count(count),
        output.display().to_string().cyan()
    );
    println!("  File size: {} KB", crate::progress::format_count((size / 1024) as usize));

    println!();
    println!("{}", "Sample records:".cyan().bold());
    for sequence in 1..=count.min(5) {
        let row = row(sequence);
        println!(
            "  {:06}: {},{},{},{}",
            sequence,
            row.donation_number,
            row.placed_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            row.product_code,
            row.hold_code
        );
    }

    Ok(())
}
