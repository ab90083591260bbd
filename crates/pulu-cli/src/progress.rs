//! Progress reporting
//!
//! One [`ProgressReporter`] per run. Workers call [`ProgressReporter::report`]
//! once per result; counters live behind a single mutex so every snapshot is
//! consistent. The live line is an `indicatif` bar redrawn every
//! `progress_batch_size` results and on the last one. Each redraw also
//! publishes a [`ProgressSnapshot`] on a watch channel.

use crate::config::OutputConfig;
use crate::records::{ProcessingResult, ProcessingStatus};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

// ============================================================================
// Icons
// ============================================================================

pub static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "OK ");
pub static FAILED: Emoji<'_, '_> = Emoji("❌ ", "ERR ");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "SKIP ");
pub static SPEED: Emoji<'_, '_> = Emoji("🚀 ", "RATE ");
pub static COMPLETE: Emoji<'_, '_> = Emoji("🎉 ", "DONE ");
pub static STOPPED: Emoji<'_, '_> = Emoji("⏹️  ", "STOP ");
pub static STATS: Emoji<'_, '_> = Emoji("📊 ", "STATS ");
pub static DURATION: Emoji<'_, '_> = Emoji("⏱️  ", "TIME ");
pub static LOG_FILE: Emoji<'_, '_> = Emoji("📋 ", "LOG ");

const RULE: &str = "═══════════════════════════════════════════════════════════════";

/// Consistent view of the counters at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Every record has a result
    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }

    /// Records per second over the elapsed time
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    total: usize,
    processed: usize,
    success: usize,
    failed: usize,
    skipped: usize,
    last_reported: usize,
    started: Instant,
}

impl ProgressState {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            last_reported: 0,
            started: Instant::now(),
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            processed: self.processed,
            success: self.success,
            failed: self.failed,
            skipped: self.skipped,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Thread-safe progress aggregate with a live console line
pub struct ProgressReporter {
    state: Mutex<ProgressState>,
    batch_size: usize,
    bar: ProgressBar,
    success_path: PathBuf,
    failure_path: PathBuf,
    updates: watch::Sender<ProgressSnapshot>,
}

impl ProgressReporter {
    /// Reporter drawing to stdout
    pub fn new(batch_size: usize, output: &OutputConfig) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout());
        bar.set_style(bar_style());

        let (updates, _) = watch::channel(ProgressSnapshot::default());
        Self {
            state: Mutex::new(ProgressState::new(0)),
            batch_size: batch_size.max(1),
            bar,
            success_path: output.success_path.clone(),
            failure_path: output.failure_path.clone(),
            updates,
        }
    }

    /// Suppress the live line (tests, non-interactive runs)
    pub fn hidden(self) -> Self {
        self.bar.set_draw_target(ProgressDrawTarget::hidden());
        self
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset counters for a run over `total` records
    pub fn initialize(&self, total: usize) {
        let mut state = self.state();
        *state = ProgressState::new(total);
        self.bar.reset();
        self.bar.set_length(total as u64);
        debug!(total, "Progress tracking initialized");
        self.redraw(&state);
    }

    /// Count one result
    pub fn report(&self, result: &ProcessingResult) {
        let mut state = self.state();
        state.processed += 1;
        match result.status() {
            ProcessingStatus::Success => state.success += 1,
            ProcessingStatus::Failed => state.failed += 1,
            ProcessingStatus::Skipped => state.skipped += 1,
        }

        if state.processed - state.last_reported >= self.batch_size || state.processed == state.total {
            state.last_reported = state.processed;
            self.redraw(&state);
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state().snapshot()
    }

    /// Receive a snapshot after every redraw
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.updates.subscribe()
    }

    /// Finish the live line and print the run summary
    pub fn display_summary(&self) -> ProgressSnapshot {
        let snapshot = {
            let state = self.state();
            self.redraw(&state);
            state.snapshot()
        };
        self.bar.abandon();

        println!(
            "{}",
            render_summary(&snapshot, &self.success_path, &self.failure_path)
        );

        info!(
            total = snapshot.total,
            success = snapshot.success,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            duration_secs = snapshot.elapsed.as_secs_f64(),
            complete = snapshot.is_complete(),
            "Processing finished"
        );
        snapshot
    }

    fn redraw(&self, state: &ProgressState) {
        let snapshot = state.snapshot();
        self.bar.set_position(snapshot.processed as u64);
        self.bar.set_message(live_message(&snapshot));
        self.updates.send_replace(snapshot);
    }
}

fn bar_style() -> ProgressStyle {
    let chars = if console::Term::stdout().features().wants_emoji() {
        "█░"
    } else {
        "=-"
    };
    ProgressStyle::with_template("[{bar:30}] {percent:>3}% ({pos}/{len}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(chars)
}

fn live_message(s: &ProgressSnapshot) -> String {
    let mut msg = format!(
        "{}{} | {}{} | {}{} | {}{:.1}/s",
        SUCCESS,
        format_count(s.success),
        FAILED,
        format_count(s.failed),
        SKIPPED,
        format_count(s.skipped),
        SPEED,
        s.rate()
    );

    let rate = s.rate();
    if rate > 0.0 && !s.is_complete() {
        let remaining = (s.total - s.processed) as f64 / rate;
        let _ = write!(msg, " | ETA: {}", format_duration(Duration::from_secs_f64(remaining)));
    }
    msg
}

/// Final summary block
pub fn render_summary(
    s: &ProgressSnapshot,
    success_path: &std::path::Path,
    failure_path: &std::path::Path,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", RULE);
    if s.is_complete() {
        let _ = writeln!(out, "  {}{}", COMPLETE, "Processing Complete!".green().bold());
    } else {
        let _ = writeln!(
            out,
            "  {}{}",
            STOPPED,
            "Processing Stopped (Ctrl+C pressed)".yellow().bold()
        );
    }
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);

    let _ = writeln!(out, "  {}Total Records:    {}", STATS, format_count(s.total));
    let _ = writeln!(
        out,
        "  {}Successful:       {} ({:.1}%)",
        SUCCESS,
        format_count(s.success).green(),
        percentage(s.success, s.processed)
    );
    let failed = format_count(s.failed);
    let _ = writeln!(
        out,
        "  {}Failed:           {} ({:.1}%)",
        FAILED,
        if s.failed > 0 { failed.red() } else { failed.normal() },
        percentage(s.failed, s.processed)
    );
    let _ = writeln!(
        out,
        "  {}Skipped:          {} ({:.1}%)",
        SKIPPED,
        format_count(s.skipped),
        percentage(s.skipped, s.processed)
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "  {}Duration:         {}", DURATION, format_duration(s.elapsed));
    let _ = writeln!(out, "  {}Processing Rate:  {:.1} records/second", SPEED, s.rate());
    let _ = writeln!(out);
    if s.failed > 0 {
        let _ = writeln!(out, "  {}Error Log:        {}", LOG_FILE, failure_path.display());
    }
    let _ = writeln!(out, "  {}Success Log:      {}", LOG_FILE, success_path.display());
    let _ = writeln!(out);
    let _ = write!(out, "{}", RULE);
    out
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// `mm:ss`, or `hh:mm:ss` from one hour up
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Integer with thousands separators
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::records::{HoldRecord, ProcessingMode, Record};
    use std::path::Path;

    fn reporter(batch: usize) -> ProgressReporter {
        ProgressReporter::new(batch, &OutputConfig::for_mode(ProcessingMode::Hold)).hidden()
    }

    fn record() -> Record {
        HoldRecord::new("G1", "PROD", "H01", None).into()
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(20000), "20,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_counters() {
        let reporter = reporter(100);
        reporter.initialize(4);
        reporter.report(&ProcessingResult::success(record()));
        reporter.report(&ProcessingResult::failure(record(), "x"));
        reporter.report(&ProcessingResult::skipped(record()));

        let s = reporter.snapshot();
        assert_eq!((s.total, s.processed, s.success, s.failed, s.skipped), (4, 3, 1, 1, 1));
        assert!(!s.is_complete());
    }

    #[test]
    fn test_redraw_throttled_by_batch_size() {
        let reporter = reporter(3);
        reporter.initialize(5);
        let mut rx = reporter.subscribe();

        reporter.report(&ProcessingResult::success(record()));
        reporter.report(&ProcessingResult::success(record()));
        assert!(!rx.has_changed().unwrap());

        reporter.report(&ProcessingResult::success(record()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().processed, 3);

        reporter.report(&ProcessingResult::success(record()));
        assert!(!rx.has_changed().unwrap());

        // The last result always redraws
        reporter.report(&ProcessingResult::success(record()));
        assert_eq!(rx.borrow_and_update().processed, 5);
    }

    #[test]
    fn test_initialize_resets() {
        let reporter = reporter(1);
        reporter.initialize(2);
        reporter.report(&ProcessingResult::success(record()));
        reporter.initialize(10);
        let s = reporter.snapshot();
        assert_eq!((s.total, s.processed, s.success), (10, 0, 0));
    }

    #[test]
    fn test_summary_complete() {
        let s = ProgressSnapshot {
            total: 1234,
            processed: 1234,
            success: 1000,
            failed: 34,
            skipped: 200,
            elapsed: Duration::from_secs(65),
        };
        let text = render_summary(&s, Path::new("ok.json"), Path::new("err.json"));
        assert!(text.contains("Processing Complete!"));
        assert!(text.contains("1,234"));
        assert!(text.contains("81.0%"));
        assert!(text.contains("01:05"));
        assert!(text.contains("err.json"));
        assert!(text.contains("ok.json"));
    }

    #[test]
    fn test_summary_stopped_without_failures() {
        let s = ProgressSnapshot {
            total: 10,
            processed: 4,
            success: 4,
            ..ProgressSnapshot::default()
        };
        let text = render_summary(&s, Path::new("ok.json"), Path::new("err.json"));
        assert!(text.contains("Processing Stopped"));
        assert!(text.contains("100.0%"));
        assert!(!text.contains("err.json"));
    }

    #[test]
    fn test_summary_with_nothing_processed() {
        let text = render_summary(&ProgressSnapshot::default(), Path::new("a"), Path::new("b"));
        assert!(text.contains("Processing Complete!"));
        assert!(text.contains("0.0%"));
    }
}
