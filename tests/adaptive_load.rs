use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_bulk_loader::adaptive::{RetryPolicy, RowFallbackPolicy};
use rust_bulk_loader::destination::{Destination, DestinationError, FailureKind};
use rust_bulk_loader::load::{
    load_table, load_tables_parallel, IfExists, LoadEvent, LoadMetrics, LoadObserver, LoadOptions, TableJob,
    TablePlan,
};
use rust_bulk_loader::types::{RowSet, SourceColumn};
use rust_bulk_loader::LoadError;

type InsertRule = Box<dyn FnMut(&[String]) -> Option<DestinationError> + Send>;

/// Destination double: decodes each insert's ids, fails it according to `rule`, and tracks which
/// ids were committed.
struct MockDestination {
    rule: InsertRule,
    exists: Option<bool>,
    pending: Vec<String>,
    log: Arc<Mutex<Log>>,
}

#[derive(Default, Debug)]
struct Log {
    calls: Vec<String>,
    ddl: Vec<String>,
    /// Row count of every insert attempted, in order.
    attempts: Vec<usize>,
    committed: Vec<String>,
}

impl MockDestination {
    fn new(rule: impl FnMut(&[String]) -> Option<DestinationError> + Send + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            exists: None,
            pending: Vec::new(),
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    fn accepting() -> Self {
        Self::new(|_| None)
    }

    fn log(&self) -> Arc<Mutex<Log>> {
        self.log.clone()
    }
}

impl Destination for MockDestination {
    fn execute(&mut self, sql: &str) -> Result<(), DestinationError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("execute".to_string());
        let Some(ids) = payload_ids(sql) else {
            log.ddl.push(sql.to_string());
            return Ok(());
        };
        log.attempts.push(ids.len());
        if let Some(err) = (self.rule)(&ids) {
            return Err(err);
        }
        self.pending.extend(ids);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("commit".to_string());
        log.committed.append(&mut self.pending);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        self.log.lock().unwrap().calls.push("rollback".to_string());
        self.pending.clear();
        Ok(())
    }

    fn table_exists(&mut self, _table: &str) -> Result<Option<bool>, DestinationError> {
        Ok(self.exists)
    }
}

/// Ids (first column) carried by a plain OPENJSON insert, or `None` for other statements.
fn payload_ids(sql: &str) -> Option<Vec<String>> {
    let start = sql.find("OPENJSON(N'")? + "OPENJSON(N'".len();
    let end = sql.rfind("')\nWITH")?;
    let json = sql[start..end].replace("''", "'");
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&json).ok()?;
    Some(
        rows.iter()
            .map(|r| r.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string())
            .collect(),
    )
}

fn numbered_rows(n: usize) -> RowSet {
    RowSet::new(
        vec![SourceColumn::new("id"), SourceColumn::new("label")],
        (0..n)
            .map(|i| vec![Some(i.to_string()), Some(format!("row {i}"))])
            .collect(),
    )
}

fn ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| i.to_string()).collect()
}

fn policy(start: usize, min: usize, max: usize, max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        start_batch: start,
        min_batch: min,
        max_batch: max,
        max_retries,
        backoff_base: Duration::ZERO,
        ..Default::default()
    }
}

fn options(policy: RetryPolicy) -> LoadOptions {
    LoadOptions {
        policy,
        ..Default::default()
    }
}

fn other_error(msg: &str) -> DestinationError {
    DestinationError::new(FailureKind::Other, msg)
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<LoadEvent>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LoadObserver for RecordingObserver {
    fn on_event(&self, _table: &str, event: &LoadEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[test]
fn single_batch_when_start_exceeds_row_count() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();
    let opts = options(policy(10_000, 1_000, 50_000, 5));

    let summary = load_table(&mut dest, "dbo.t", &numbered_rows(100), &opts).unwrap();

    assert_eq!(summary.sent_rows, 100);
    assert_eq!(summary.batches, 1);
    assert!(summary.is_complete());
    let log = log.lock().unwrap();
    assert_eq!(log.attempts, vec![100]);
    assert_eq!(log.committed, ids(0..100));
    assert_eq!(log.ddl.len(), 1);
    assert!(log.ddl[0].starts_with("IF OBJECT_ID(N'[dbo].[t]', N'U') IS NULL"));
}

#[test]
fn failures_hold_offset_until_a_smaller_batch_succeeds() {
    let mut calls = 0;
    let mut dest = MockDestination::new(move |_| {
        calls += 1;
        (calls <= 2).then(|| other_error("constraint rejected the batch"))
    });
    let log = dest.log();
    let observer = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        ..options(policy(5_000, 1_000, 50_000, 5))
    };

    let summary = load_table(&mut dest, "t", &numbered_rows(12_000), &opts).unwrap();
    assert_eq!(summary.sent_rows, 12_000);

    let events = observer.events();
    let failures: Vec<(usize, u32)> = events
        .iter()
        .filter_map(|e| match e {
            LoadEvent::BatchFailed {
                offset,
                consecutive_failures,
                ..
            } => Some((*offset, *consecutive_failures)),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![(0, 1), (0, 2)]);

    let first_commit = events
        .iter()
        .find_map(|e| match e {
            LoadEvent::BatchCommitted { offset, rows, .. } => Some((*offset, *rows)),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_commit, (0, 3_200));

    let log = log.lock().unwrap();
    assert_eq!(&log.attempts[..3], &[5_000, 4_000, 3_200]);
    assert_eq!(log.committed, ids(0..12_000));
}

#[test]
fn fixed_mode_grows_additively() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();
    let opts = options(RetryPolicy {
        fixed_batch: true,
        ..policy(5_000, 1_000, 50_000, 5)
    });

    load_table(&mut dest, "t", &numbered_rows(20_000), &opts).unwrap();

    // 5000 -> +1000 -> +1000 (6000/20 = 300 < 1000), remainder 2000
    assert_eq!(log.lock().unwrap().attempts, vec![5_000, 6_000, 7_000, 2_000]);
}

#[test]
fn adaptive_mode_grows_multiplicatively_on_fast_batches() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();
    load_table(&mut dest, "t", &numbered_rows(20_000), &options(policy(5_000, 1_000, 50_000, 5))).unwrap();
    assert_eq!(log.lock().unwrap().attempts, vec![5_000, 6_000, 7_200, 1_800]);
}

#[test]
fn always_failing_destination_terminates() {
    let mut dest = MockDestination::new(|_| Some(other_error("constraint violation")));
    let log = dest.log();
    let observer = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        ..options(policy(4, 2, 8, 3))
    };

    let err = load_table(&mut dest, "dbo.t", &numbered_rows(10), &opts).unwrap_err();
    match err {
        LoadError::Terminal {
            table,
            offset,
            message,
            sent_rows,
            skipped_rows,
        } => {
            assert_eq!(table, "dbo.t");
            assert_eq!(offset, 0);
            assert!(message.contains("constraint violation"));
            assert_eq!(sent_rows, 0);
            assert!(skipped_rows.is_empty());
        }
        other => panic!("unexpected error {other:?}"),
    }

    // 3 shrinking batch attempts (4, 3, 2), then each row of the last failed range alone
    let log = log.lock().unwrap();
    assert_eq!(log.attempts, vec![4, 3, 2, 1, 1]);
    assert!(log.committed.is_empty());

    let events = observer.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, LoadEvent::FallbackStarted { offset: 0, rows: 2 })));
    assert!(matches!(events.last(), Some(LoadEvent::LoadFailed { offset: 0, .. })));
}

#[test]
fn single_row_table_with_persistent_failure_aborts_without_fallback() {
    let mut dest = MockDestination::new(|_| Some(other_error("bad value")));
    let log = dest.log();
    let err = load_table(&mut dest, "t", &numbered_rows(1), &options(policy(4, 2, 8, 3))).unwrap_err();
    assert!(matches!(err, LoadError::Terminal { offset: 0, .. }));
    assert_eq!(log.lock().unwrap().attempts, vec![1, 1, 1]);
}

#[test]
fn bad_rows_are_skipped_and_reported() {
    let mut dest = MockDestination::new(|ids| {
        ids.iter()
            .any(|id| id == "3")
            .then(|| other_error("Conversion failed for row 3"))
    });
    let log = dest.log();
    let metrics = Arc::new(LoadMetrics::new());
    let opts = LoadOptions {
        observer: Some(metrics.clone()),
        ..options(policy(4, 4, 8, 2))
    };

    let summary = load_table(&mut dest, "t", &numbered_rows(10), &opts).unwrap();

    assert_eq!(summary.sent_rows, 9);
    assert!(!summary.is_complete());
    assert_eq!(summary.skipped_rows.len(), 1);
    assert_eq!(summary.skipped_rows[0].index, 3);
    assert!(summary.skipped_rows[0].message.contains("Conversion failed"));

    let mut committed = log.lock().unwrap().committed.clone();
    committed.sort_by_key(|id| id.parse::<usize>().unwrap());
    let mut expected = ids(0..10);
    expected.retain(|id| id != "3");
    assert_eq!(committed, expected);

    let snap = metrics.snapshot();
    assert_eq!(snap.rows_skipped, 1);
    assert_eq!(snap.fallbacks, 1);
    assert_eq!(snap.batch_failures, 2);
    assert_eq!(snap.rows_sent, 9);
    assert_eq!(snap.loads_finished, 1);
}

#[test]
fn abort_policy_stops_at_the_first_bad_row() {
    let mut dest = MockDestination::new(|ids| ids.iter().any(|id| id == "3").then(|| other_error("bad")));
    let opts = options(RetryPolicy {
        row_fallback: RowFallbackPolicy::AbortOnFirstFailure,
        ..policy(4, 4, 8, 2)
    });
    let err = load_table(&mut dest, "t", &numbered_rows(10), &opts).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Terminal {
            offset: 3,
            sent_rows: 3,
            ..
        }
    ));
}

#[test]
fn abort_after_an_earlier_fallback_keeps_the_skipped_rows() {
    let mut dest = MockDestination::new(|ids| {
        ids.iter()
            .any(|id| id == "3" || id.parse::<usize>().unwrap() >= 8)
            .then(|| other_error("row rejected"))
    });
    let log = dest.log();
    let observer = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        ..options(policy(4, 4, 8, 2))
    };

    let err = load_table(&mut dest, "dbo.t", &numbered_rows(12), &opts).unwrap_err();
    // [0, 4) falls back and skips row 3, [4, 8) commits, then every row of [8, 12) fails
    match &err {
        LoadError::Terminal {
            offset,
            sent_rows,
            skipped_rows,
            ..
        } => {
            assert_eq!(*offset, 8);
            assert_eq!(*sent_rows, 7);
            assert_eq!(skipped_rows.len(), 1);
            assert_eq!(skipped_rows[0].index, 3);
            assert_eq!(skipped_rows[0].message, "row rejected");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("(7 rows committed, 1 skipped)"));

    let mut committed = log.lock().unwrap().committed.clone();
    committed.sort_by_key(|id| id.parse::<usize>().unwrap());
    assert_eq!(committed, vec!["0", "1", "2", "4", "5", "6", "7"]);
    assert!(matches!(
        observer.events().last(),
        Some(LoadEvent::LoadFailed { offset: 8, .. })
    ));
}

/// Accepts nothing: every statement, schema statements included, is rejected.
struct RejectingDestination {
    exists: Result<Option<bool>, DestinationError>,
}

impl Destination for RejectingDestination {
    fn execute(&mut self, _sql: &str) -> Result<(), DestinationError> {
        Err(DestinationError::new(FailureKind::Other, "permission denied for CREATE TABLE"))
    }

    fn commit(&mut self) -> Result<(), DestinationError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DestinationError> {
        Ok(())
    }

    fn table_exists(&mut self, _table: &str) -> Result<Option<bool>, DestinationError> {
        self.exists.clone()
    }
}

#[test]
fn failed_table_preparation_is_reported_to_the_observer() {
    let mut dest = RejectingDestination { exists: Ok(None) };
    let observer = Arc::new(RecordingObserver::default());
    let metrics = Arc::new(LoadMetrics::new());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        ..options(policy(4, 2, 8, 3))
    };

    let err = load_table(&mut dest, "t", &numbered_rows(5), &opts).unwrap_err();
    assert!(matches!(err, LoadError::Destination(_)));

    let events = observer.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        LoadEvent::LoadFailed {
            offset,
            message,
            progress,
        } => {
            assert_eq!(*offset, 0);
            assert!(message.contains("permission denied"));
            assert_eq!(progress.sent_rows, 0);
            assert_eq!(progress.total_rows, 5);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let opts = LoadOptions {
        observer: Some(metrics.clone()),
        ..options(policy(4, 2, 8, 3))
    };
    assert!(load_table(&mut dest, "t", &numbered_rows(5), &opts).is_err());
    assert_eq!(metrics.snapshot().loads_failed, 1);
}

#[test]
fn failed_existence_check_is_reported_to_the_observer() {
    let mut dest = RejectingDestination {
        exists: Err(DestinationError::from_message("Login failed for user")),
    };
    let observer = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        if_exists: IfExists::Skip,
        ..options(policy(4, 2, 8, 3))
    };

    assert!(load_table(&mut dest, "t", &numbered_rows(5), &opts).is_err());
    assert!(matches!(
        observer.events().as_slice(),
        [LoadEvent::LoadFailed { offset: 0, .. }]
    ));
}

#[test]
fn every_insert_is_committed_before_the_next_one() {
    let mut failed_once = false;
    let mut dest = MockDestination::new(move |_| {
        if failed_once {
            None
        } else {
            failed_once = true;
            Some(DestinationError::from_message("Execution Timeout Expired"))
        }
    });
    let log = dest.log();
    load_table(&mut dest, "t", &numbered_rows(3_000), &options(policy(2_000, 1_000, 50_000, 5))).unwrap();

    let log = log.lock().unwrap();
    // create + commit, failed insert + rollback, then execute/commit pairs
    let calls: Vec<&str> = log.calls.iter().map(String::as_str).collect();
    assert_eq!(&calls[..4], &["execute", "commit", "execute", "rollback"]);
    for pair in calls[4..].chunks(2) {
        assert_eq!(pair, ["execute", "commit"]);
    }
    // timeout shrinks twice: 2000 -> 1600 -> 1280
    assert_eq!(&log.attempts[..2], &[2_000, 1_280]);
    assert_eq!(log.committed, ids(0..3_000));
}

#[test]
fn observer_sees_ordered_progress() {
    let mut dest = MockDestination::accepting();
    let observer = Arc::new(RecordingObserver::default());
    let opts = LoadOptions {
        observer: Some(observer.clone()),
        ..options(policy(1_000, 1_000, 2_000, 5))
    };
    load_table(&mut dest, "t", &numbered_rows(5_000), &opts).unwrap();

    let events = observer.events();
    assert!(matches!(
        events.first(),
        Some(LoadEvent::LoadStarted {
            total_rows: 5_000,
            columns: 2,
            batch_size: 1_000
        })
    ));
    let LoadEvent::LoadFinished(summary) = events.last().unwrap() else {
        panic!("last event should be LoadFinished");
    };
    assert_eq!(summary.sent_rows, 5_000);

    let mut last_sent = 0;
    let mut last_ewma = None;
    for e in &events {
        if let LoadEvent::BatchCommitted { progress, .. } = e {
            assert!(progress.sent_rows > last_sent);
            assert!(progress.batch_size >= 1_000 && progress.batch_size <= 2_000);
            assert!(progress.ewma_rows_per_sec.is_some());
            last_sent = progress.sent_rows;
            last_ewma = progress.ewma_rows_per_sec;
        }
    }
    assert_eq!(last_sent, 5_000);
    assert!(last_ewma.unwrap() > 0.0);
    assert!(events
        .iter()
        .any(|e| matches!(e, LoadEvent::BatchResized { from: 1_000, to: 1_200, .. })));
}

#[test]
fn replace_drops_before_create_and_skip_leaves_existing_tables_alone() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();
    let opts = LoadOptions {
        if_exists: IfExists::Replace,
        ..Default::default()
    };
    let summary = load_table(&mut dest, "dbo.t", &numbered_rows(5), &opts).unwrap();
    assert_eq!(summary.plan, TablePlan::DropAndCreate);
    {
        let log = log.lock().unwrap();
        assert!(log.ddl[0].contains("DROP TABLE [dbo].[t]"));
        assert!(log.ddl[1].contains("CREATE TABLE [dbo].[t]"));
    }

    let mut dest = MockDestination::accepting();
    dest.exists = Some(true);
    let log = dest.log();
    let opts = LoadOptions {
        if_exists: IfExists::Skip,
        ..Default::default()
    };
    let summary = load_table(&mut dest, "dbo.t", &numbered_rows(5), &opts).unwrap();
    assert_eq!(summary.plan, TablePlan::SkipExisting);
    assert_eq!(summary.sent_rows, 0);
    assert!(log.lock().unwrap().calls.is_empty());
}

#[test]
fn type_overrides_reach_the_ddl() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();
    let mut opts = LoadOptions::default();
    opts.dtypes.insert("id".to_string(), "text".to_string());
    load_table(&mut dest, "t", &numbered_rows(12), &opts).unwrap();
    assert!(log.lock().unwrap().ddl[0].contains("[id] NVARCHAR(2) NOT NULL"));

    opts.dtypes.insert("nope".to_string(), "int".to_string());
    let err = load_table(&mut MockDestination::accepting(), "t", &numbered_rows(1), &opts).unwrap_err();
    assert!(matches!(err, LoadError::Validation { .. }));
}

#[test]
fn invalid_input_is_rejected_before_anything_is_sent() {
    let mut dest = MockDestination::accepting();
    let log = dest.log();

    let err = load_table(&mut dest, "  ", &numbered_rows(3), &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::Validation { .. }));

    let no_columns = RowSet::new(Vec::new(), Vec::new());
    let err = load_table(&mut dest, "t", &no_columns, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::Validation { .. }));

    let bad_policy = options(policy(10, 100, 50, 5));
    assert!(load_table(&mut dest, "t", &numbered_rows(3), &bad_policy).is_err());

    assert!(log.lock().unwrap().calls.is_empty());
}

#[test]
fn parallel_tables_are_independent() {
    let logs: Arc<Mutex<Vec<(String, Arc<Mutex<Log>>)>>> = Arc::default();
    let jobs = (0..4)
        .map(|i| TableJob {
            table: format!("t{i}"),
            rows: numbered_rows(100 * (i + 1)),
            options: options(policy(50, 10, 500, 2)),
        })
        .collect();

    let outcomes = load_tables_parallel(jobs, 2, |table| {
        if table == "t2" {
            return Err(DestinationError::from_message("connection reset by peer"));
        }
        let dest = MockDestination::accepting();
        logs.lock().unwrap().push((table.to_string(), dest.log()));
        Ok(dest)
    })
    .unwrap();

    let names: Vec<&str> = outcomes.iter().map(|o| o.table.as_str()).collect();
    assert_eq!(names, vec!["t0", "t1", "t2", "t3"]);
    assert!(matches!(outcomes[2].result, Err(LoadError::Destination(_))));
    for (i, o) in outcomes.iter().enumerate().filter(|(i, _)| *i != 2) {
        assert_eq!(o.result.as_ref().unwrap().sent_rows, 100 * (i + 1));
    }

    for (table, log) in logs.lock().unwrap().iter() {
        let n: usize = table[1..].parse().unwrap();
        assert_eq!(log.lock().unwrap().committed, ids(0..100 * (n + 1)));
    }
}
