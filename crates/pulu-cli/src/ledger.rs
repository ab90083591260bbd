//! Persistence ledger
//!
//! Owns the two output files of a run:
//!
//! - **Success store**: a pretty-printed JSON array of [`SuccessEntry`]. Its
//!   keys are loaded at startup so a restarted run skips records that already
//!   succeeded. Successes are queued and written in batches; each write reads
//!   the whole array, appends, and replaces the file through a temp file and
//!   rename, so an interrupted write never leaves invalid JSON behind. The
//!   cost of a write grows with the size of the store.
//! - **Failure store**: newline-delimited JSON of [`FailureEntry`], appended
//!   and synced as soon as failures arrive.
//!
//! A single async write lock serialises every file write. The in-memory key
//! set and the pending queue have their own short-lived locks and are never
//! held across an await.

use crate::error::{CliError, Result};
use crate::records::{ProcessingMode, ProcessingResult, ProcessingStatus, Record};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Identifying fields of a record as written to either store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub key: String,
    pub mode: ProcessingMode,
    pub unit_number: String,
    pub product_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_code: Option<String>,
    #[serde(
        with = "pulu_common::wire_time::optional",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub placed_at: Option<NaiveDateTime>,
}

impl From<&Record> for LedgerRecord {
    fn from(record: &Record) -> Self {
        let (hold_code, location_code) = match record {
            Record::Hold(r) => (Some(r.hold_code.clone()), None),
            Record::Discard(r) => (r.hold_code.clone(), Some(r.location_code.clone())),
        };
        Self {
            key: record.key(),
            mode: record.mode(),
            unit_number: record.unit_number().to_string(),
            product_code: record.product_code().to_string(),
            hold_code,
            location_code,
            placed_at: record.placed_at(),
        }
    }
}

/// One element of the success store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEntry {
    #[serde(flatten)]
    pub record: LedgerRecord,
    pub processed_at: DateTime<Utc>,
}

/// One line of the failure store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    #[serde(flatten)]
    pub record: LedgerRecord,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

/// Durable record of what a run (and earlier runs) achieved
#[derive(Debug)]
pub struct Ledger {
    success_path: PathBuf,
    failure_path: PathBuf,
    batch_size: usize,
    keys: Mutex<HashSet<String>>,
    pending: Mutex<Vec<SuccessEntry>>,
    write_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Ledger {
    pub fn new(success_path: impl Into<PathBuf>, failure_path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            success_path: success_path.into(),
            failure_path: failure_path.into(),
            batch_size: batch_size.max(1),
            keys: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn success_path(&self) -> &Path {
        &self.success_path
    }

    pub fn failure_path(&self) -> &Path {
        &self.failure_path
    }

    /// Load keys of every record the success store already holds
    ///
    /// A missing, empty or unreadable store yields an empty set; startup is
    /// never blocked by the ledger.
    pub async fn load_processed_keys(&self) -> HashSet<String> {
        let loaded = match read_success_store(&self.success_path).await {
            Ok(entries) => entries.iter().filter_map(entry_key).collect::<HashSet<_>>(),
            Err(e) => {
                warn!(
                    path = %self.success_path.display(),
                    error = %e,
                    "Could not read success store, starting without resume data"
                );
                HashSet::new()
            }
        };

        info!(count = loaded.len(), path = %self.success_path.display(), "Loaded processed keys");
        lock(&self.keys).extend(loaded.iter().cloned());
        loaded
    }

    /// Whether the record succeeded in this run or an earlier one
    pub fn is_processed(&self, record: &Record) -> bool {
        lock(&self.keys).contains(&record.key())
    }

    /// Successes currently queued for the next write
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Mark results as processed and queue them for the success store
    ///
    /// Writes once the queue reaches the batch size. Non-success results are
    /// ignored.
    pub async fn record_successes(&self, results: &[ProcessingResult]) -> Result<()> {
        let entries: Vec<SuccessEntry> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| SuccessEntry {
                record: LedgerRecord::from(r.record()),
                processed_at: r.completed_at(),
            })
            .collect();

        if entries.is_empty() {
            return Ok(());
        }

        {
            let mut keys = lock(&self.keys);
            keys.extend(entries.iter().map(|e| e.record.key.clone()));
        }

        let due = {
            let mut pending = lock(&self.pending);
            pending.extend(entries);
            pending.len() >= self.batch_size
        };

        if due {
            self.flush_pending().await?;
        }
        Ok(())
    }

    /// Append failures to the failure store and sync them to disk
    ///
    /// Only `Failed` results are written.
    pub async fn record_failures(&self, results: &[ProcessingResult]) -> Result<()> {
        let mut buf = Vec::new();
        let mut count = 0usize;

        for result in results.iter().filter(|r| r.status() == ProcessingStatus::Failed) {
            let entry = FailureEntry {
                record: LedgerRecord::from(result.record()),
                error_message: result.error_message().unwrap_or("Unknown error").to_string(),
                failed_at: result.completed_at(),
            };
            serde_json::to_writer(&mut buf, &entry)?;
            buf.push(b'\n');
            count += 1;
        }

        if count == 0 {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        ensure_parent(&self.failure_path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failure_path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;

        debug!(count, path = %self.failure_path.display(), "Appended failures");
        Ok(())
    }

    /// Write every queued success; a no-op when nothing is queued
    pub async fn flush_all(&self) -> Result<()> {
        self.flush_pending().await
    }

    async fn flush_pending(&self) -> Result<()> {
        let batch = std::mem::take(&mut *lock(&self.pending));
        if batch.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.write_successes(&batch).await {
            error!(
                count = batch.len(),
                path = %self.success_path.display(),
                error = %e,
                "Success store write failed, batch re-queued"
            );
            let mut pending = lock(&self.pending);
            let newer = std::mem::replace(&mut *pending, batch);
            pending.extend(newer);
            return Err(e);
        }
        Ok(())
    }

    async fn write_successes(&self, batch: &[SuccessEntry]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = &self.success_path;

        let mut entries = match read_success_store(path).await {
            Ok(entries) => entries,
            Err(CliError::JsonParse(e)) => {
                let backup = corrupt_backup_path(path);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Success store is corrupt, moving it aside"
                );
                tokio::fs::rename(path, &backup).await?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        for entry in batch {
            entries.push(serde_json::to_value(entry)?);
        }

        let json = serde_json::to_vec_pretty(&entries)?;
        ensure_parent(path).await?;

        let tmp = temp_path(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;

        debug!(
            written = batch.len(),
            total = entries.len(),
            path = %path.display(),
            "Success store updated"
        );
        Ok(())
    }
}

/// Read the success store as raw JSON values, keeping fields this version
/// does not know about
async fn read_success_store(path: &Path) -> Result<Vec<Value>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_slice(&bytes)?)
}

/// Key of a stored entry; entries without a `key` field are keyed from
/// their identifying fields
fn entry_key(entry: &Value) -> Option<String> {
    if let Some(key) = entry.get("key").and_then(Value::as_str) {
        return Some(key.to_string());
    }

    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| entry.get(*n).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let unit = field(&["unitNumber", "donationNumber", "DonationNumber", "UnitNumber"])?;
    let product = field(&["productCode", "ProductCode"])?;
    let qualifier = field(&["holdCode", "HoldCode", "locationCode", "LocationCode"])?;
    Some(format!(
        "{}{sep}{}{sep}{}",
        unit,
        product,
        qualifier,
        sep = crate::records::KEY_SEPARATOR
    ))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::records::{DiscardRecord, HoldRecord};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ledger(dir: &TempDir, batch: usize) -> Ledger {
        Ledger::new(dir.path().join("ok.json"), dir.path().join("errors.json"), batch)
    }

    fn hold(n: usize) -> Record {
        HoldRecord::new(format!("G{:06}", n), "PROD", "H01", None).into()
    }

    fn successes(range: std::ops::Range<usize>) -> Vec<ProcessingResult> {
        range.map(|n| ProcessingResult::success(hold(n))).collect()
    }

    fn read_array(path: &Path) -> Vec<Value> {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(ledger(&dir, 10).load_processed_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_store_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.json"), "[{\"key\": ").unwrap();
        assert!(ledger(&dir, 10).load_processed_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_successes_batched_until_threshold() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, 3);

        ledger.record_successes(&successes(0..2)).await.unwrap();
        assert!(!ledger.success_path().exists());
        assert_eq!(ledger.pending_count(), 2);
        assert!(ledger.is_processed(&hold(1)));

        ledger.record_successes(&successes(2..3)).await.unwrap();
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(read_array(ledger.success_path()).len(), 3);
    }

    #[tokio::test]
    async fn test_flush_all_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, 100);

        ledger.record_successes(&successes(0..5)).await.unwrap();
        ledger.flush_all().await.unwrap();
        ledger.flush_all().await.unwrap();

        assert_eq!(read_array(ledger.success_path()).len(), 5);
    }

    #[tokio::test]
    async fn test_success_entry_shape() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, 1);
        let record: Record = DiscardRecord::new("U100", "E0791", "LAB1").into();

        ledger
            .record_successes(&[ProcessingResult::success(record)])
            .await
            .unwrap();

        let entries = read_array(ledger.success_path());
        let entry = &entries[0];
        assert_eq!(entry["key"], "U100|E0791|LAB1");
        assert_eq!(entry["mode"], "discard");
        assert_eq!(entry["unitNumber"], "U100");
        assert_eq!(entry["locationCode"], "LAB1");
        assert!(entry.get("holdCode").is_none());
        let processed_at = entry["processedAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(processed_at).is_ok());
    }

    #[tokio::test]
    async fn test_resume_keys_from_previous_run() {
        let dir = TempDir::new().unwrap();
        {
            let first = ledger(&dir, 100);
            first.record_successes(&successes(0..4)).await.unwrap();
            first.flush_all().await.unwrap();
        }

        let second = ledger(&dir, 100);
        let keys = second.load_processed_keys().await;
        assert_eq!(keys.len(), 4);
        assert!(second.is_processed(&hold(3)));
        assert!(!second.is_processed(&hold(4)));

        second.record_successes(&successes(4..6)).await.unwrap();
        second.flush_all().await.unwrap();
        assert_eq!(read_array(second.success_path()).len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_fields_and_legacy_entries_are_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ok.json"),
            r#"[{"DonationNumber":"G1","ProductCode":"PROD","HoldCode":"H01","ProcessedAt":"2024-08-13T00:00:00Z"}]"#,
        )
        .unwrap();

        let ledger = ledger(&dir, 1);
        let keys = ledger.load_processed_keys().await;
        assert!(keys.contains("G1|PROD|H01"));

        ledger.record_successes(&successes(0..1)).await.unwrap();
        let entries = read_array(ledger.success_path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["DonationNumber"], "G1");
    }

    #[tokio::test]
    async fn test_corrupt_store_moved_aside_on_write() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.json"), "not json").unwrap();

        let ledger = ledger(&dir, 1);
        ledger.record_successes(&successes(0..1)).await.unwrap();

        assert_eq!(read_array(ledger.success_path()).len(), 1);
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("ok.json.corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn test_failures_appended_immediately() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, 100);

        ledger
            .record_failures(&[ProcessingResult::failure(hold(1), "Hold not found")])
            .await
            .unwrap();
        ledger
            .record_failures(&[
                ProcessingResult::failure(hold(2), "HTTP 500 Internal Server Error: boom"),
                ProcessingResult::success(hold(3)),
            ])
            .await
            .unwrap();

        let content = std::fs::read_to_string(ledger.failure_path()).unwrap();
        let lines: Vec<FailureEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].error_message, "Hold not found");
        assert_eq!(lines[1].record.key, "G000002|PROD|H01");
        assert!(content.contains("\"failedAt\""));
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_store_valid() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(ledger(&dir, 7));

        let mut tasks = Vec::new();
        for t in 0..8 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                for n in 0..25 {
                    let id = t * 100 + n;
                    ledger
                        .record_successes(&successes(id..id + 1))
                        .await
                        .unwrap();
                    ledger
                        .record_failures(&[ProcessingResult::failure(hold(10_000 + id), "x")])
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        ledger.flush_all().await.unwrap();

        assert_eq!(read_array(ledger.success_path()).len(), 200);
        let failures = std::fs::read_to_string(ledger.failure_path()).unwrap();
        assert_eq!(failures.lines().count(), 200);
    }

    #[test]
    fn test_temp_and_backup_paths() {
        let path = Path::new("/out/Hold_Clear_Ok.json");
        assert_eq!(temp_path(path), PathBuf::from("/out/Hold_Clear_Ok.json.tmp"));
        assert!(corrupt_backup_path(path)
            .to_string_lossy()
            .starts_with("/out/Hold_Clear_Ok.json.corrupt-"));
    }
}
