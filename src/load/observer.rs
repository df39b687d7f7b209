use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adaptive::ResizeReason;
use crate::destination::FailureKind;

use super::LoadSummary;

/// Throughput snapshot attached to progress events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Rows committed so far.
    pub sent_rows: usize,
    /// Rows in the source.
    pub total_rows: usize,
    /// Batch size the next attempt will use.
    pub batch_size: usize,
    /// Wall time since the load started.
    pub elapsed_seconds: f64,
    /// Rate of the attempt that produced this event (0 for failures).
    pub rows_per_sec: f64,
    /// Smoothed rate; `None` until the first batch committed.
    pub ewma_rows_per_sec: Option<f64>,
}

impl Progress {
    /// Committed share of the table, in percent.
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            100.0
        } else {
            self.sent_rows as f64 * 100.0 / self.total_rows as f64
        }
    }
}

/// Events emitted while loading one table.
///
/// Row offsets and indices are zero-based positions in the source [`crate::types::RowSet`].
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// The table is prepared and the first batch is about to be sent.
    LoadStarted {
        /// Rows in the source.
        total_rows: usize,
        /// Destination columns.
        columns: usize,
        /// Size of the first batch.
        batch_size: usize,
    },
    /// A batch (or a single fallback row) was accepted by the destination.
    BatchCommitted {
        /// First row of the batch.
        offset: usize,
        /// Rows in the batch.
        rows: usize,
        /// Time the destination took to accept it.
        elapsed: Duration,
        /// Single-row attempt inside a fallback window.
        fallback: bool,
        progress: Progress,
    },
    /// A batch was rejected and will be retried, split or given up on.
    BatchFailed {
        /// First row of the batch.
        offset: usize,
        /// Rows in the batch.
        rows: usize,
        /// Classification of the destination error.
        kind: FailureKind,
        /// Destination error text.
        message: String,
        /// Failures in a row at this offset, including this one.
        consecutive_failures: u32,
        progress: Progress,
    },
    /// The batch size changed.
    BatchResized {
        /// Previous size.
        from: usize,
        /// New size.
        to: usize,
        reason: ResizeReason,
    },
    /// Retries ran out and the window is now sent one row at a time.
    FallbackStarted {
        /// First row of the window.
        offset: usize,
        /// Rows in the window.
        rows: usize,
    },
    /// A single row failed inside a fallback window and was left out.
    RowSkipped {
        /// Row index in the source.
        index: usize,
        /// Destination error text for that row.
        message: String,
    },
    /// Every row of a fallback window was either committed or skipped.
    FallbackFinished {
        /// Rows committed one by one.
        committed: usize,
        /// Rows left out.
        skipped: usize,
    },
    /// The whole table was sent. Always the last event of a successful load.
    LoadFinished(LoadSummary),
    /// The load stopped early. Always the last event of a failed load.
    LoadFailed {
        /// First row that was not committed.
        offset: usize,
        /// Why the load stopped.
        message: String,
        progress: Progress,
    },
}

/// Observer hook for load events.
///
/// Called synchronously from the load loop, so implementations should return quickly.
pub trait LoadObserver: Send + Sync {
    fn on_event(&self, table: &str, event: &LoadEvent);
}

impl<O: LoadObserver + ?Sized> LoadObserver for Arc<O> {
    fn on_event(&self, table: &str, event: &LoadEvent) {
        (**self).on_event(table, event)
    }
}

/// An observer that fans out events to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn LoadObserver>) {
        self.observers.push(observer);
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_event(&self, table: &str, event: &LoadEvent) {
        for o in &self.observers {
            o.on_event(table, event);
        }
    }
}

/// Prints one line per event to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl LoadObserver for StdErrObserver {
    fn on_event(&self, table: &str, event: &LoadEvent) {
        eprintln!("[load][{table}] {}", describe(event));
    }
}

/// Appends events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl LoadObserver for FileObserver {
    fn on_event(&self, table: &str, event: &LoadEvent) {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        self.append_line(&format!("{ts} table={table} {}", describe(event)));
    }
}

/// Forwards events to `tracing`: progress at `info`, per-row fallback detail at `debug`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_event(&self, table: &str, event: &LoadEvent) {
        match event {
            LoadEvent::LoadStarted { .. } | LoadEvent::LoadFinished(_) | LoadEvent::FallbackFinished { .. } => {
                tracing::info!(table, "{}", describe(event))
            }
            LoadEvent::BatchCommitted {
                fallback: false,
                progress,
                ..
            } => tracing::info!(
                table,
                sent_rows = progress.sent_rows,
                total_rows = progress.total_rows,
                batch_size = progress.batch_size,
                rows_per_sec = progress.rows_per_sec,
                "{:.1}% loaded",
                progress.percent()
            ),
            LoadEvent::BatchFailed { .. } | LoadEvent::FallbackStarted { .. } | LoadEvent::LoadFailed { .. } => {
                tracing::warn!(table, "{}", describe(event))
            }
            _ => tracing::debug!(table, "{}", describe(event)),
        }
    }
}

fn describe(event: &LoadEvent) -> String {
    match event {
        LoadEvent::LoadStarted {
            total_rows,
            columns,
            batch_size,
        } => format!("started rows={total_rows} columns={columns} batch_size={batch_size}"),
        LoadEvent::BatchCommitted {
            offset,
            rows,
            elapsed,
            fallback,
            progress,
        } => format!(
            "committed offset={offset} rows={rows} fallback={fallback} elapsed={:.3}s sent={}/{} rate={:.0}/s ewma={}",
            elapsed.as_secs_f64(),
            progress.sent_rows,
            progress.total_rows,
            progress.rows_per_sec,
            fmt_rate(progress.ewma_rows_per_sec)
        ),
        LoadEvent::BatchFailed {
            offset,
            rows,
            kind,
            message,
            consecutive_failures,
            ..
        } => format!(
            "failed offset={offset} rows={rows} kind={kind} attempt={consecutive_failures} err={message}"
        ),
        LoadEvent::BatchResized { from, to, reason } => {
            format!("resized {from} -> {to} ({reason})")
        }
        LoadEvent::FallbackStarted { offset, rows } => {
            format!("row fallback over [{offset}, {})", offset + rows)
        }
        LoadEvent::RowSkipped { index, message } => format!("skipped row={index} err={message}"),
        LoadEvent::FallbackFinished { committed, skipped } => {
            format!("row fallback finished committed={committed} skipped={skipped}")
        }
        LoadEvent::LoadFinished(summary) => format!("finished {summary}"),
        LoadEvent::LoadFailed {
            offset, message, ..
        } => format!("aborted offset={offset} err={message}"),
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.0}/s")).unwrap_or_else(|| "-".to_string())
}

/// Running counters across every load this observer has seen.
///
/// Updated from the events themselves, so one instance can be shared across parallel table
/// loads; callers can snapshot it at any time.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    loads_started: AtomicU64,
    loads_finished: AtomicU64,
    loads_failed: AtomicU64,
    rows_sent: AtomicU64,
    batches_committed: AtomicU64,
    batch_failures: AtomicU64,
    rows_skipped: AtomicU64,
    fallbacks: AtomicU64,
    resizes: AtomicU64,
    insert_ns: AtomicU64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        LoadMetricsSnapshot {
            loads_started: self.loads_started.load(Ordering::SeqCst),
            loads_finished: self.loads_finished.load(Ordering::SeqCst),
            loads_failed: self.loads_failed.load(Ordering::SeqCst),
            rows_sent: self.rows_sent.load(Ordering::SeqCst),
            batches_committed: self.batches_committed.load(Ordering::SeqCst),
            batch_failures: self.batch_failures.load(Ordering::SeqCst),
            rows_skipped: self.rows_skipped.load(Ordering::SeqCst),
            fallbacks: self.fallbacks.load(Ordering::SeqCst),
            resizes: self.resizes.load(Ordering::SeqCst),
            insert_time: Duration::from_nanos(self.insert_ns.load(Ordering::SeqCst)),
        }
    }
}

impl LoadObserver for LoadMetrics {
    fn on_event(&self, _table: &str, event: &LoadEvent) {
        match event {
            LoadEvent::LoadStarted { .. } => {
                let _ = self.loads_started.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::BatchCommitted { rows, elapsed, .. } => {
                let _ = self.batches_committed.fetch_add(1, Ordering::SeqCst);
                let _ = self.rows_sent.fetch_add(*rows as u64, Ordering::SeqCst);
                let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
                let _ = self.insert_ns.fetch_add(ns, Ordering::SeqCst);
            }
            LoadEvent::BatchFailed { .. } => {
                let _ = self.batch_failures.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::BatchResized { .. } => {
                let _ = self.resizes.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::FallbackStarted { .. } => {
                let _ = self.fallbacks.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::RowSkipped { .. } => {
                let _ = self.rows_skipped.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::LoadFinished(_) => {
                let _ = self.loads_finished.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::LoadFailed { .. } => {
                let _ = self.loads_failed.fetch_add(1, Ordering::SeqCst);
            }
            LoadEvent::FallbackFinished { .. } => {}
        }
    }
}

/// Immutable snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    pub loads_started: u64,
    pub loads_finished: u64,
    pub loads_failed: u64,
    pub rows_sent: u64,
    pub batches_committed: u64,
    pub batch_failures: u64,
    pub rows_skipped: u64,
    pub fallbacks: u64,
    pub resizes: u64,
    /// Summed execute + commit time of committed statements.
    pub insert_time: Duration,
}

impl fmt::Display for LoadMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loads={}/{} failed={}, rows_sent={}, batches={}, batch_failures={}, rows_skipped={}, fallbacks={}, resizes={}, insert_time={:?}",
            self.loads_finished,
            self.loads_started,
            self.loads_failed,
            self.rows_sent,
            self.batches_committed,
            self.batch_failures,
            self.rows_skipped,
            self.fallbacks,
            self.resizes,
            self.insert_time
        )
    }
}
