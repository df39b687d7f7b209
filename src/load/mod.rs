//! Per-table load orchestration.
//!
//! [`load_table`] ties the pieces together for one table: infer column types, prepare the
//! destination table, then drive [`LoadState`] against a [`Destination`] until every row is
//! committed or skipped, or the load aborts. Each statement is committed before the state machine
//! advances past it.
//!
//! [`load_tables_parallel`] runs independent table loads on a bounded rayon pool. Every job opens
//! its own destination; nothing is shared between jobs except the (thread-safe) observer.

pub mod observer;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::adaptive::{rows_per_sec, Attempt, LoadState, Outcome, Phase, Resize, RetryPolicy, SkippedRow, Step};
use crate::destination::{Destination, DestinationError};
use crate::error::{LoadError, LoadResult};
use crate::payload::PayloadEncoder;
use crate::schema::{apply_type_overrides, create_table_sql, drop_table_sql, infer_columns};
use crate::types::{ColumnDescriptor, RowSet};

pub use observer::{
    CompositeObserver, FileObserver, LoadEvent, LoadMetrics, LoadMetricsSnapshot, LoadObserver, Progress,
    StdErrObserver, TracingObserver,
};

/// What to do when the destination table may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Create the table if missing and insert into it either way.
    #[default]
    Append,
    /// Drop the table if present, then create it.
    Replace,
    /// Leave an existing table untouched and load nothing.
    Skip,
}

/// Table preparation decided from [`IfExists`] and what the destination knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePlan {
    CreateIfMissing,
    DropAndCreate,
    SkipExisting,
}

impl IfExists {
    /// Resolve the policy against `exists` (`None` when the destination cannot tell).
    ///
    /// `Skip` only skips on a confirmed existing table; otherwise the guarded create makes the
    /// load behave like `Append`.
    pub fn resolve(self, exists: Option<bool>) -> TablePlan {
        match (self, exists) {
            (Self::Append, _) => TablePlan::CreateIfMissing,
            (Self::Replace, _) => TablePlan::DropAndCreate,
            (Self::Skip, Some(true)) => TablePlan::SkipExisting,
            (Self::Skip, _) => TablePlan::CreateIfMissing,
        }
    }
}

/// Options for one table load.
///
/// Use [`Default`] for common cases.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub policy: RetryPolicy,
    /// Ship payloads gzip-compressed and unpack them server-side.
    pub compress: bool,
    pub if_exists: IfExists,
    /// Column name -> type name overrides applied after inference.
    pub dtypes: BTreeMap<String, String>,
    /// Optional observer for progress and failures.
    pub observer: Option<Arc<dyn LoadObserver>>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("policy", &self.policy)
            .field("compress", &self.compress)
            .field("if_exists", &self.if_exists)
            .field("dtypes", &self.dtypes)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

/// Result of a table load that did not abort.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub table: String,
    pub plan: TablePlan,
    pub columns: Vec<ColumnDescriptor>,
    pub total_rows: usize,
    /// Rows committed.
    pub sent_rows: usize,
    /// Rows left out after failing on their own during row-level fallback.
    pub skipped_rows: Vec<SkippedRow>,
    /// Statements committed.
    pub batches: usize,
    pub elapsed: Duration,
    pub final_batch_size: usize,
    pub ewma_rows_per_sec: Option<f64>,
}

impl LoadSummary {
    /// Whether every row landed.
    pub fn is_complete(&self) -> bool {
        self.sent_rows == self.total_rows
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plan == TablePlan::SkipExisting {
            return write!(f, "table={} skipped (already exists)", self.table);
        }
        write!(
            f,
            "table={} rows={}/{} skipped={} batches={} elapsed={:.2}s final_batch_size={}",
            self.table,
            self.sent_rows,
            self.total_rows,
            self.skipped_rows.len(),
            self.batches,
            self.elapsed.as_secs_f64(),
            self.final_batch_size
        )?;
        if let Some(rate) = self.ewma_rows_per_sec {
            write!(f, " ewma={rate:.0}/s")?;
        }
        Ok(())
    }
}

/// Load `rows` into `table`.
///
/// Returns [`LoadError::Validation`] for bad input or settings before anything is sent,
/// [`LoadError::Destination`] when table preparation fails, and [`LoadError::Terminal`] when the
/// row loop cannot make progress. Rows skipped during fallback are not errors; they are listed in
/// [`LoadSummary::skipped_rows`], or in the `Terminal` error when a later window aborts the load.
///
/// Once the observer has seen anything, the last event is always [`LoadEvent::LoadFinished`] or
/// [`LoadEvent::LoadFailed`].
///
/// ```rust
/// use rust_bulk_loader::destination::ScriptDestination;
/// use rust_bulk_loader::load::{load_table, LoadOptions};
/// use rust_bulk_loader::types::{RowSet, SourceColumn};
///
/// let rows = RowSet::new(
///     vec![SourceColumn::new("id"), SourceColumn::new("name")],
///     vec![
///         vec![Some("1".to_string()), Some("ada".to_string())],
///         vec![Some("2".to_string()), None],
///     ],
/// );
/// let mut dest = ScriptDestination::new(Vec::new());
/// let summary = load_table(&mut dest, "dbo.people", &rows, &LoadOptions::default()).unwrap();
/// assert_eq!(summary.sent_rows, 2);
/// assert_eq!(dest.statements(), 2); // create + one insert
/// ```
pub fn load_table<D: Destination>(
    dest: &mut D,
    table: &str,
    rows: &RowSet,
    options: &LoadOptions,
) -> LoadResult<LoadSummary> {
    let started = Instant::now();
    options.policy.validate()?;
    if table.trim().is_empty() {
        return Err(LoadError::validation("table name is empty"));
    }

    let columns = apply_type_overrides(infer_columns(rows), &options.dtypes)?;
    let encoder = PayloadEncoder::new(table, &columns, options.compress)?;

    let run = LoadRun {
        table,
        observer: options.observer.as_deref(),
        started,
    };
    let mut state = LoadState::new(rows.row_count(), options.policy.clone());

    let exists = match options.if_exists {
        IfExists::Skip => match dest.table_exists(table) {
            Ok(exists) => exists,
            Err(e) => return Err(run.failed(&state, 0, e.into())),
        },
        _ => None,
    };
    let plan = options.if_exists.resolve(exists);

    if plan == TablePlan::SkipExisting {
        tracing::info!(table, "table already exists, skipping load");
        let summary = LoadSummary {
            table: table.to_string(),
            plan,
            columns,
            total_rows: rows.row_count(),
            sent_rows: 0,
            skipped_rows: Vec::new(),
            batches: 0,
            elapsed: started.elapsed(),
            final_batch_size: options.policy.initial_batch(),
            ewma_rows_per_sec: None,
        };
        run.emit(&LoadEvent::LoadFinished(summary.clone()));
        return Ok(summary);
    }

    if let Err(e) = prepare_table(dest, table, &columns, plan) {
        return Err(run.failed(&state, 0, e));
    }

    tracing::info!(
        table,
        rows = rows.row_count(),
        columns = columns.len(),
        batch_size = state.current_batch_size(),
        compress = options.compress,
        "starting load"
    );
    run.emit(&LoadEvent::LoadStarted {
        total_rows: rows.row_count(),
        columns: columns.len(),
        batch_size: state.current_batch_size(),
    });

    loop {
        match state.phase().clone() {
            Phase::Done => break,
            Phase::Failed { offset, message } => {
                let sent_rows = state.sent_rows();
                let mut skipped_rows = state.into_skipped_rows();
                skipped_rows.retain(|row| row.index < offset);
                return Err(LoadError::Terminal {
                    table: table.to_string(),
                    offset,
                    message,
                    sent_rows,
                    skipped_rows,
                });
            }
            Phase::Backoff => {
                let delay = state.backoff_delay();
                if !delay.is_zero() {
                    tracing::warn!(
                        table,
                        attempt = state.consecutive_failures(),
                        max_attempts = state.policy().max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying insert"
                    );
                    thread::sleep(delay);
                }
                let steps = state.resume();
                run.report(&state, &steps, Duration::ZERO);
            }
            Phase::Sending | Phase::RowFallback { .. } => {
                let Some(attempt) = state.next_attempt() else {
                    break;
                };
                let outcome = match run_attempt(dest, &encoder, rows, &attempt, table) {
                    Ok(outcome) => outcome,
                    Err(e) => return Err(run.failed(&state, attempt.offset, e)),
                };
                let elapsed = outcome.elapsed();
                let steps = state.apply(&attempt, outcome);
                run.report(&state, &steps, elapsed);
            }
        }
    }

    let summary = LoadSummary {
        table: table.to_string(),
        plan,
        columns,
        total_rows: state.total_rows(),
        sent_rows: state.sent_rows(),
        batches: state.batches(),
        elapsed: started.elapsed(),
        final_batch_size: state.current_batch_size(),
        ewma_rows_per_sec: state.ewma_rows_per_sec(),
        skipped_rows: state.into_skipped_rows(),
    };
    tracing::info!(
        table,
        sent_rows = summary.sent_rows,
        skipped_rows = summary.skipped_rows.len(),
        batches = summary.batches,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "load finished"
    );
    run.emit(&LoadEvent::LoadFinished(summary.clone()));
    Ok(summary)
}

fn prepare_table<D: Destination>(
    dest: &mut D,
    table: &str,
    columns: &[ColumnDescriptor],
    plan: TablePlan,
) -> LoadResult<()> {
    if plan == TablePlan::DropAndCreate {
        tracing::info!(table, "dropping existing table");
        run_ddl(dest, &drop_table_sql(table)?)?;
    }
    run_ddl(dest, &create_table_sql(table, columns)?)
}

fn run_ddl<D: Destination>(dest: &mut D, sql: &str) -> LoadResult<()> {
    tracing::debug!(sql, "executing schema statement");
    if let Err(e) = dest.execute(sql).and_then(|()| dest.commit()) {
        let _ = dest.rollback();
        return Err(e.into());
    }
    Ok(())
}

/// Encode, execute and commit one attempt. Only encoding errors propagate; destination failures
/// become an [`Outcome::Failed`] for the state machine.
fn run_attempt<D: Destination>(
    dest: &mut D,
    encoder: &PayloadEncoder,
    rows: &RowSet,
    attempt: &Attempt,
    table: &str,
) -> LoadResult<Outcome> {
    let stmt = encoder.encode(rows.batch(attempt.range()))?;
    tracing::debug!(
        table,
        offset = attempt.offset,
        rows = stmt.rows,
        json_bytes = stmt.json_len,
        payload_bytes = stmt.payload.len(),
        fallback = attempt.fallback,
        "sending batch"
    );

    let started = Instant::now();
    let result = dest.execute(&stmt.sql).and_then(|()| dest.commit());
    let elapsed = started.elapsed();
    Ok(match result {
        Ok(()) => Outcome::Committed { elapsed },
        Err(error) => {
            if let Err(e) = dest.rollback() {
                tracing::warn!(error = %e, table, "rollback after failed insert failed");
            }
            Outcome::Failed { error, elapsed }
        }
    })
}

/// Event plumbing for one load.
struct LoadRun<'a> {
    table: &'a str,
    observer: Option<&'a dyn LoadObserver>,
    started: Instant,
}

impl LoadRun<'_> {
    fn emit(&self, event: &LoadEvent) {
        if let Some(o) = self.observer {
            o.on_event(self.table, event);
        }
    }

    fn progress(&self, state: &LoadState, rate: f64) -> Progress {
        Progress {
            sent_rows: state.sent_rows(),
            total_rows: state.total_rows(),
            batch_size: state.current_batch_size(),
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            rows_per_sec: rate,
            ewma_rows_per_sec: state.ewma_rows_per_sec(),
        }
    }

    /// Report an error that ends the load outside the state machine, and hand it back.
    fn failed(&self, state: &LoadState, offset: usize, error: LoadError) -> LoadError {
        tracing::error!(table = self.table, offset, error = %error, "load aborted");
        self.emit(&LoadEvent::LoadFailed {
            offset,
            message: error.to_string(),
            progress: self.progress(state, 0.0),
        });
        error
    }

    fn resized(&self, resize: &Resize) {
        tracing::debug!(
            table = self.table,
            from = resize.from,
            to = resize.to,
            reason = %resize.reason,
            "batch size changed"
        );
        self.emit(&LoadEvent::BatchResized {
            from: resize.from,
            to: resize.to,
            reason: resize.reason,
        });
    }

    fn report(&self, state: &LoadState, steps: &[Step], elapsed: Duration) {
        let table = self.table;
        for step in steps {
            match step {
                Step::Committed {
                    attempt,
                    measurement,
                } => {
                    let rate = measurement
                        .as_ref()
                        .map(|m| m.rows_per_sec)
                        .unwrap_or_else(|| rows_per_sec(attempt.rows, elapsed));
                    tracing::debug!(
                        table,
                        offset = attempt.offset,
                        rows = attempt.rows,
                        elapsed_ms = elapsed.as_millis() as u64,
                        rows_per_sec = rate,
                        "batch committed"
                    );
                    self.emit(&LoadEvent::BatchCommitted {
                        offset: attempt.offset,
                        rows: attempt.rows,
                        elapsed,
                        fallback: attempt.fallback,
                        progress: self.progress(state, rate),
                    });
                    if let Some(resize) = measurement.as_ref().and_then(|m| m.resize) {
                        self.resized(&resize);
                    }
                }
                Step::BatchFailed {
                    attempt,
                    error,
                    consecutive_failures,
                    resize,
                } => {
                    tracing::warn!(
                        error = %error,
                        table,
                        offset = attempt.offset,
                        rows = attempt.rows,
                        attempt = consecutive_failures,
                        "insert failed, will retry"
                    );
                    self.emit(&LoadEvent::BatchFailed {
                        offset: attempt.offset,
                        rows: attempt.rows,
                        kind: error.effective_kind(),
                        message: error.message.clone(),
                        consecutive_failures: *consecutive_failures,
                        progress: self.progress(state, 0.0),
                    });
                    if let Some(resize) = resize {
                        self.resized(resize);
                    }
                }
                Step::FallbackStarted { offset, rows } => {
                    tracing::warn!(table, offset, rows, "retries exhausted, inserting rows one at a time");
                    self.emit(&LoadEvent::FallbackStarted {
                        offset: *offset,
                        rows: *rows,
                    });
                }
                Step::RowSkipped(row) => {
                    tracing::warn!(table, row = row.index, error = %row.message, "skipping row");
                    self.emit(&LoadEvent::RowSkipped {
                        index: row.index,
                        message: row.message.clone(),
                    });
                }
                Step::FallbackFinished { committed, skipped } => {
                    tracing::info!(table, committed, skipped, "row fallback finished, resuming batches");
                    self.emit(&LoadEvent::FallbackFinished {
                        committed: *committed,
                        skipped: *skipped,
                    });
                }
                Step::Finished => {}
                Step::Aborted { offset, message } => {
                    tracing::error!(table, offset, error = %message, "load aborted");
                    self.emit(&LoadEvent::LoadFailed {
                        offset: *offset,
                        message: message.clone(),
                        progress: self.progress(state, 0.0),
                    });
                }
            }
        }
    }
}

/// One table to load on the parallel runner.
#[derive(Debug, Clone)]
pub struct TableJob {
    pub table: String,
    pub rows: RowSet,
    pub options: LoadOptions,
}

/// Per-table result from [`load_tables_parallel`].
#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub result: LoadResult<LoadSummary>,
}

/// Load independent tables concurrently, at most `max_parallel` at a time.
///
/// `open` is called once per job, on the worker thread, to get that job's destination. A failure
/// in one table does not stop the others. Results come back in job order.
pub fn load_tables_parallel<D, F>(
    jobs: Vec<TableJob>,
    max_parallel: usize,
    open: F,
) -> LoadResult<Vec<TableOutcome>>
where
    D: Destination,
    F: Fn(&str) -> Result<D, DestinationError> + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(max_parallel.max(1))
        .thread_name(|i| format!("bulkload-table-{i}"))
        .build()
        .map_err(|e| LoadError::validation(format!("failed to build table worker pool: {e}")))?;

    Ok(pool.install(|| {
        jobs.into_par_iter()
            .map(|job| {
                let result = open(&job.table)
                    .map_err(LoadError::from)
                    .and_then(|mut dest| load_table(&mut dest, &job.table, &job.rows, &job.options));
                if let Err(e) = &result {
                    tracing::error!(table = %job.table, error = %e, "table load failed");
                }
                TableOutcome {
                    table: job.table,
                    result,
                }
            })
            .collect()
    }))
}
