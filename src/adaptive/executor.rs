//! Retry / backoff / row-fallback state machine for one table load.
//!
//! [`LoadState`] never talks to a destination. The load loop asks it for the next
//! [`Attempt`], runs the statement, and feeds the [`Outcome`] back through [`LoadState::apply`].
//! After a failure the state sits in [`Phase::Backoff`] until the loop has slept and called
//! [`LoadState::resume`]. Each call returns the [`Step`]s it took so callers can report them.
//!
//! ```text
//! Sending --ok--> Sending | Done
//! Sending --err--> Backoff --(failures < max_retries)--> Sending
//!                  Backoff --(failures >= max_retries, batch > 1 row)--> RowFallback
//!                  Backoff --(failures >= max_retries, batch == 1 row)--> Failed
//! RowFallback --(window done, some row landed)--> Sending | Done
//! RowFallback --(every row failed | abort policy)--> Failed
//! ```

use std::ops::Range;
use std::time::Duration;

use crate::destination::DestinationError;

use super::controller::{BatchSizeController, Measurement, Resize};
use super::policy::{RetryPolicy, RowFallbackPolicy};

/// Where the load loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Sending normal batches from `offset`.
    Sending,
    /// The last attempt failed; waiting before deciding how to retry.
    Backoff,
    /// Sending rows `[offset, end)` one at a time after repeated batch failures.
    RowFallback {
        start: usize,
        end: usize,
        committed: usize,
        skipped: usize,
    },
    /// Every row was committed or skipped.
    Done,
    /// No further progress is possible.
    Failed { offset: usize, message: String },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// One insert attempt: rows `[offset, offset + rows)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub offset: usize,
    pub rows: usize,
    /// Single-row attempt inside a fallback window.
    pub fallback: bool,
}

impl Attempt {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.rows
    }
}

/// Result of running an [`Attempt`] against the destination.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Statement executed and committed.
    Committed { elapsed: Duration },
    /// Statement (or its commit) failed.
    Failed {
        error: DestinationError,
        elapsed: Duration,
    },
}

impl Outcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Committed { elapsed } | Self::Failed { elapsed, .. } => *elapsed,
        }
    }
}

/// A row that failed on its own during fallback and was left out of the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// Zero-based index into the table's row sequence.
    pub index: usize,
    pub message: String,
}

/// Something the state machine did in response to an outcome or a resume.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A batch (or fallback row) was committed.
    Committed {
        attempt: Attempt,
        measurement: Option<Measurement>,
    },
    /// A batch failed; it will be retried from the same offset.
    BatchFailed {
        attempt: Attempt,
        error: DestinationError,
        consecutive_failures: u32,
        resize: Option<Resize>,
    },
    /// Row-level fallback began over `[offset, offset + rows)`.
    FallbackStarted { offset: usize, rows: usize },
    /// A single row failed and was skipped.
    RowSkipped(SkippedRow),
    /// The fallback window finished; normal batching resumes.
    FallbackFinished { committed: usize, skipped: usize },
    /// All rows handled.
    Finished,
    /// The load cannot continue.
    Aborted { offset: usize, message: String },
}

/// Mutable progress of one table load. Owned by a single load loop.
#[derive(Debug, Clone)]
pub struct LoadState {
    total_rows: usize,
    offset: usize,
    sent_rows: usize,
    batches: usize,
    controller: BatchSizeController,
    consecutive_failures: u32,
    last_failed_offset: Option<usize>,
    last_failed_rows: usize,
    last_error: Option<DestinationError>,
    skipped: Vec<SkippedRow>,
    phase: Phase,
}

impl LoadState {
    pub fn new(total_rows: usize, policy: RetryPolicy) -> Self {
        Self {
            total_rows,
            offset: 0,
            sent_rows: 0,
            batches: 0,
            controller: BatchSizeController::new(policy),
            consecutive_failures: 0,
            last_failed_offset: None,
            last_failed_rows: 0,
            last_error: None,
            skipped: Vec::new(),
            phase: if total_rows == 0 {
                Phase::Done
            } else {
                Phase::Sending
            },
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Next row index to attempt.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Rows committed so far.
    pub fn sent_rows(&self) -> usize {
        self.sent_rows
    }

    /// Statements committed so far (batches plus fallback rows).
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn current_batch_size(&self) -> usize {
        self.controller.current()
    }

    pub fn ewma_rows_per_sec(&self) -> Option<f64> {
        self.controller.ewma_rows_per_sec()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failed_offset(&self) -> Option<usize> {
        self.last_failed_offset
    }

    pub fn skipped_rows(&self) -> &[SkippedRow] {
        &self.skipped
    }

    pub fn into_skipped_rows(self) -> Vec<SkippedRow> {
        self.skipped
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.controller.policy()
    }

    /// How long to wait before [`Self::resume`].
    pub fn backoff_delay(&self) -> Duration {
        self.policy().backoff_delay(self.consecutive_failures)
    }

    /// The attempt to run next, if the phase sends anything.
    pub fn next_attempt(&self) -> Option<Attempt> {
        match self.phase {
            Phase::Sending => Some(Attempt {
                offset: self.offset,
                rows: self.controller.current().min(self.total_rows - self.offset),
                fallback: false,
            }),
            Phase::RowFallback { .. } => Some(Attempt {
                offset: self.offset,
                rows: 1,
                fallback: true,
            }),
            _ => None,
        }
    }

    /// Feed back the outcome of `attempt`.
    ///
    /// Outcomes that do not match the current phase (e.g. after a terminal state) are ignored.
    pub fn apply(&mut self, attempt: &Attempt, outcome: Outcome) -> Vec<Step> {
        if attempt.offset != self.offset {
            return Vec::new();
        }
        let in_fallback = match self.phase {
            Phase::Sending => false,
            Phase::RowFallback { .. } => true,
            _ => return Vec::new(),
        };
        match (in_fallback, outcome) {
            (false, Outcome::Committed { elapsed }) => {
                self.commit_rows(attempt.rows);
                self.consecutive_failures = 0;
                self.last_failed_offset = None;
                let measurement = self.controller.on_success(attempt.rows, elapsed);

                let mut steps = vec![Step::Committed {
                    attempt: *attempt,
                    measurement: Some(measurement),
                }];
                self.finish_if_complete(&mut steps);
                steps
            }
            (false, Outcome::Failed { error, .. }) => {
                if self.last_failed_offset == Some(self.offset) {
                    self.consecutive_failures += 1;
                } else {
                    self.last_failed_offset = Some(self.offset);
                    self.consecutive_failures = 1;
                }
                self.last_failed_rows = attempt.rows;
                let resize = self.controller.on_failure(error.is_transient());
                self.last_error = Some(error.clone());
                self.phase = Phase::Backoff;

                vec![Step::BatchFailed {
                    attempt: *attempt,
                    error,
                    consecutive_failures: self.consecutive_failures,
                    resize,
                }]
            }
            (true, Outcome::Committed { .. }) => {
                self.commit_rows(1);
                if let Phase::RowFallback { committed, .. } = &mut self.phase {
                    *committed += 1;
                }
                let mut steps = vec![Step::Committed {
                    attempt: *attempt,
                    measurement: None,
                }];
                self.advance_fallback(&mut steps);
                steps
            }
            (true, Outcome::Failed { error, .. }) => {
                let row = SkippedRow {
                    index: self.offset,
                    message: error.message.clone(),
                };
                self.skipped.push(row.clone());
                self.offset += 1;
                self.last_error = Some(error);
                if let Phase::RowFallback { skipped, .. } = &mut self.phase {
                    *skipped += 1;
                }
                let mut steps = vec![Step::RowSkipped(row.clone())];

                if self.policy().row_fallback == RowFallbackPolicy::AbortOnFirstFailure {
                    let message = format!(
                        "row {} failed during row-level fallback: {}",
                        row.index, row.message
                    );
                    self.abort(row.index, message, &mut steps);
                    return steps;
                }
                self.advance_fallback(&mut steps);
                steps
            }
        }
    }

    /// Leave [`Phase::Backoff`]: retry, fall back to single rows, or give up.
    pub fn resume(&mut self) -> Vec<Step> {
        if self.phase != Phase::Backoff {
            return Vec::new();
        }
        let max_retries = self.policy().max_retries;
        if self.consecutive_failures < max_retries {
            self.phase = Phase::Sending;
            return Vec::new();
        }

        let mut steps = Vec::new();
        if self.last_failed_rows <= 1 {
            let message = format!(
                "single-row insert failed {} times with no smaller unit to fall back to: {}",
                self.consecutive_failures,
                self.last_error_message()
            );
            self.abort(self.offset, message, &mut steps);
            return steps;
        }

        let rows = self.last_failed_rows;
        self.phase = Phase::RowFallback {
            start: self.offset,
            end: self.offset + rows,
            committed: 0,
            skipped: 0,
        };
        steps.push(Step::FallbackStarted {
            offset: self.offset,
            rows,
        });
        steps
    }

    fn commit_rows(&mut self, rows: usize) {
        self.offset += rows;
        self.sent_rows += rows;
        self.batches += 1;
    }

    fn advance_fallback(&mut self, steps: &mut Vec<Step>) {
        let Phase::RowFallback {
            start,
            end,
            committed,
            skipped,
        } = self.phase
        else {
            return;
        };
        if self.offset < end {
            return;
        }

        if committed == 0 {
            let message = format!(
                "all {} rows in [{start}, {end}) failed during row-level fallback; last error: {}",
                end - start,
                self.last_error_message()
            );
            self.abort(start, message, steps);
            return;
        }

        self.consecutive_failures = 0;
        self.last_failed_offset = None;
        self.phase = Phase::Sending;
        steps.push(Step::FallbackFinished { committed, skipped });
        self.finish_if_complete(steps);
    }

    fn finish_if_complete(&mut self, steps: &mut Vec<Step>) {
        if self.offset >= self.total_rows {
            self.phase = Phase::Done;
            steps.push(Step::Finished);
        }
    }

    fn abort(&mut self, offset: usize, message: String, steps: &mut Vec<Step>) {
        self.phase = Phase::Failed {
            offset,
            message: message.clone(),
        };
        steps.push(Step::Aborted { offset, message });
    }

    fn last_error_message(&self) -> &str {
        self.last_error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error")
    }
}
