//! Worker pool
//!
//! Drives one run through its phases:
//!
//! ```text
//! Idle -> LoadingLedger -> Dispatching -> Draining -> Flushing -> Summarized
//! ```
//!
//! Records the ledger already knows are reported as skipped, in input order,
//! before any worker starts. The rest go into one FIFO queue drained by N
//! workers. Each worker submits a record, routes the result into the success
//! or failure accumulator, then reports it, so the progress counters never
//! run ahead of what the ledger will eventually hold.
//!
//! A background flusher hands accumulated results to the ledger every
//! `flush_interval`. Once all workers and the flusher have stopped, whatever
//! is left is flushed regardless of cancellation and the summary is printed.

use crate::api::ApiGateway;
use crate::config::{AppConfig, MAX_THREADS, MIN_THREADS};
use crate::error::{CliError, Result};
use crate::ledger::Ledger;
use crate::progress::{ProgressReporter, ProgressSnapshot};
use crate::records::{ProcessingResult, Record};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Idle,
    LoadingLedger,
    Dispatching,
    Draining,
    Flushing,
    Summarized,
}

/// Settings the pool takes from the resolved configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub threads: usize,
    pub clear_code: String,
    pub flush_interval: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            threads: config.threads,
            clear_code: config.clear_code.clone(),
            flush_interval: config.processing.flush_interval(),
        }
    }
}

/// Results not yet handed to the ledger
#[derive(Debug, Default)]
struct Accumulators {
    successes: Vec<ProcessingResult>,
    failures: Vec<ProcessingResult>,
}

impl Accumulators {
    fn push(&mut self, result: ProcessingResult) {
        if result.is_success() {
            self.successes.push(result);
        } else {
            self.failures.push(result);
        }
    }

    /// Empty both accumulators, returning what they held
    fn take(&mut self) -> (Vec<ProcessingResult>, Vec<ProcessingResult>) {
        (std::mem::take(&mut self.successes), std::mem::take(&mut self.failures))
    }

    /// Put failures that could not be written back ahead of newer ones
    fn requeue_failures(&mut self, mut failures: Vec<ProcessingResult>) {
        failures.append(&mut self.failures);
        self.failures = failures;
    }

    fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }
}

/// State shared by the workers and the flusher of one run
struct RunContext<G> {
    gateway: Arc<G>,
    ledger: Arc<Ledger>,
    reporter: Arc<ProgressReporter>,
    clear_code: String,
    queue: Mutex<VecDeque<Record>>,
    accumulators: Mutex<Accumulators>,
    permits: Semaphore,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded pool of workers draining records against an [`ApiGateway`]
pub struct WorkerPool<G> {
    gateway: Arc<G>,
    ledger: Arc<Ledger>,
    reporter: Arc<ProgressReporter>,
    settings: PoolSettings,
    phase: Mutex<PoolPhase>,
    loaded_keys: Mutex<Option<usize>>,
}

impl<G: ApiGateway + 'static> WorkerPool<G> {
    /// Create a pool; the thread count must be within 1 to 50 and the
    /// flush interval non-zero
    pub fn new(
        gateway: Arc<G>,
        ledger: Arc<Ledger>,
        reporter: Arc<ProgressReporter>,
        settings: PoolSettings,
    ) -> Result<Self> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&settings.threads) {
            return Err(CliError::config(format!(
                "thread count must be between {} and {}, got {}",
                MIN_THREADS, MAX_THREADS, settings.threads
            )));
        }
        if settings.flush_interval.is_zero() {
            return Err(CliError::config("flush interval must be greater than zero"));
        }

        Ok(Self {
            gateway,
            ledger,
            reporter,
            settings,
            phase: Mutex::new(PoolPhase::Idle),
            loaded_keys: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> PoolPhase {
        *lock(&self.phase)
    }

    fn enter(&self, phase: PoolPhase) {
        let previous = std::mem::replace(&mut *lock(&self.phase), phase);
        info!(from = ?previous, to = ?phase, "Pool phase changed");
    }

    /// Load keys of records that succeeded in earlier runs
    ///
    /// Returns how many were found. `run` calls this itself when it has not
    /// been called yet.
    pub async fn load_ledger(&self) -> usize {
        let cached = *lock(&self.loaded_keys);
        if let Some(count) = cached {
            return count;
        }

        self.enter(PoolPhase::LoadingLedger);
        let count = self.ledger.load_processed_keys().await.len();
        *lock(&self.loaded_keys) = Some(count);
        count
    }

    /// Separate records the ledger already holds from the ones to submit,
    /// both in input order
    fn split_processed(&self, records: Vec<Record>) -> (Vec<Record>, VecDeque<Record>) {
        let mut skipped = Vec::new();
        let mut queue = VecDeque::with_capacity(records.len());
        for record in records {
            if self.ledger.is_processed(&record) {
                skipped.push(record);
            } else {
                queue.push_back(record);
            }
        }
        (skipped, queue)
    }

    /// Process every record and print the summary
    ///
    /// Cancelling `cancel` stops workers between records; calls already in
    /// flight finish, and every result produced is still flushed and counted.
    pub async fn run(&self, records: Vec<Record>, cancel: CancellationToken) -> ProgressSnapshot {
        self.load_ledger().await;

        self.enter(PoolPhase::Dispatching);
        self.reporter.initialize(records.len());

        let (skipped, queue) = self.split_processed(records);
        info!(queued = queue.len(), skipped = skipped.len(), "Dispatched records");
        for record in skipped {
            self.reporter.report(&ProcessingResult::skipped(record));
        }

        let ctx = Arc::new(RunContext {
            gateway: Arc::clone(&self.gateway),
            ledger: Arc::clone(&self.ledger),
            reporter: Arc::clone(&self.reporter),
            clear_code: self.settings.clear_code.clone(),
            queue: Mutex::new(queue),
            accumulators: Mutex::new(Accumulators::default()),
            permits: Semaphore::new(self.settings.threads),
        });

        self.enter(PoolPhase::Draining);

        let stop_flusher = CancellationToken::new();
        let flusher = tokio::spawn(flusher_task(
            Arc::clone(&ctx),
            self.settings.flush_interval,
            stop_flusher.clone(),
        ));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.threads {
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();
            workers.spawn(async move { (worker_id, worker_loop(worker_id, ctx, cancel).await) });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((worker, processed)) => {
                    debug!(worker, processed, "Worker completed");
                }
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        stop_flusher.cancel();
        if let Err(e) = flusher.await {
            error!(error = %e, "Flusher task failed");
        }

        self.enter(PoolPhase::Flushing);
        flush_accumulated(&ctx).await;
        if !lock(&ctx.accumulators).is_empty() {
            error!("Some failures could not be written to the failure store");
        }
        if let Err(e) = self.ledger.flush_all().await {
            error!(error = %e, "Final success store write failed");
        }

        let left = lock(&ctx.queue).len();
        if left > 0 {
            warn!(remaining = left, "Run stopped before the queue was drained");
        }

        let snapshot = self.reporter.display_summary();
        self.enter(PoolPhase::Summarized);
        snapshot
    }
}

async fn worker_loop<G: ApiGateway>(worker_id: usize, ctx: Arc<RunContext<G>>, cancel: CancellationToken) -> usize {
    let mut processed = 0usize;

    loop {
        if cancel.is_cancelled() {
            debug!(worker = worker_id, "Cancellation observed, worker stopping");
            break;
        }

        let Ok(_permit) = ctx.permits.acquire().await else {
            break;
        };

        let next = lock(&ctx.queue).pop_front();
        let Some(record) = next else {
            break;
        };

        let result = process_record(&ctx, record).await;

        lock(&ctx.accumulators).push(result.clone());
        ctx.reporter.report(&result);
        processed += 1;
    }

    processed
}

/// Submit one record; a panic becomes a failed result
async fn process_record<G: ApiGateway>(ctx: &RunContext<G>, record: Record) -> ProcessingResult {
    let outcome = AssertUnwindSafe(ctx.gateway.submit(&record, &ctx.clear_code))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(key = %record.key(), error = %message, "Worker panicked while processing record");
            ProcessingResult::failure(record, format!("Worker error: {}", message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn flusher_task<G>(ctx: Arc<RunContext<G>>, every: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        // Outside the select so a stop request never interrupts a write.
        flush_accumulated(&ctx).await;
    }
}

/// Move accumulated results to the ledger
///
/// Failures that fail to write go back into the accumulator for the next
/// flush. Successes are owned by the ledger once handed over.
async fn flush_accumulated<G>(ctx: &RunContext<G>) {
    let (successes, failures) = lock(&ctx.accumulators).take();
    let (success_count, failure_count) = (successes.len(), failures.len());

    if !failures.is_empty() {
        if let Err(e) = ctx.ledger.record_failures(&failures).await {
            error!(count = failure_count, error = %e, "Failure store write failed, will retry");
            lock(&ctx.accumulators).requeue_failures(failures);
        }
    }

    if !successes.is_empty() {
        // The ledger queues successes before writing and re-queues on error.
        if let Err(e) = ctx.ledger.record_successes(&successes).await {
            error!(count = success_count, error = %e, "Success store write failed");
        }
    }

    if success_count > 0 || failure_count > 0 {
        debug!(successes = success_count, failures = failure_count, "Flushed results");
    }
}
