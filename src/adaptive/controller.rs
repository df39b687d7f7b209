//! Feedback-controlled batch sizing.
//!
//! [`next_batch_size`] is a pure function of the previous size, how long the attempt took and
//! whether it succeeded. [`BatchSizeController`] wraps it together with the EWMA throughput
//! estimate for one table load.

use std::fmt;
use std::time::Duration;

use super::policy::RetryPolicy;

/// Smoothing factor for the throughput estimate.
pub const EWMA_ALPHA: f64 = 0.25;

/// Shortest elapsed time used when computing a rate, so instant batches don't divide by zero.
const MIN_ELAPSED_SECS: f64 = 0.001;

/// Exponentially weighted moving average. Uninitialized until the first observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in one observation and return the new average.
    pub fn update(&mut self, observed: f64) -> f64 {
        let next = match self.value {
            None => observed,
            Some(prev) => self.alpha * observed + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(EWMA_ALPHA)
    }
}

/// Rows per second for `rows` sent in `elapsed`.
pub fn rows_per_sec(rows: usize, elapsed: Duration) -> f64 {
    rows as f64 / elapsed.as_secs_f64().max(MIN_ELAPSED_SECS)
}

/// Decide the next batch size.
///
/// - success, adaptive: grow by `inc_factor` below the fast threshold, shrink by `dec_factor`
///   above the slow threshold, otherwise keep `prev`
/// - success, `fixed_mode`: add `max(prev / 20, 1000)`; never shrinks on success
/// - failure: shrink by `dec_factor` in either mode
///
/// The result is always within `[policy.min_batch, policy.max_batch]`.
pub fn next_batch_size(
    prev: usize,
    elapsed_seconds: f64,
    success: bool,
    fixed_mode: bool,
    policy: &RetryPolicy,
) -> usize {
    let next = if !success {
        scale(prev, policy.dec_factor)
    } else if fixed_mode {
        prev.saturating_add((prev / 20).max(1_000))
    } else if elapsed_seconds < policy.fast_threshold() {
        scale(prev, policy.inc_factor)
    } else if elapsed_seconds > policy.slow_threshold() {
        scale(prev, policy.dec_factor)
    } else {
        prev
    };
    policy.clamp(next)
}

/// Failure-path size: one decrease step, or two when the failure looked size/time related.
pub fn shrink_after_failure(prev: usize, accelerated: bool, policy: &RetryPolicy) -> usize {
    let once = next_batch_size(prev, 0.0, false, policy.fixed_batch, policy);
    if accelerated {
        next_batch_size(once, 0.0, false, policy.fixed_batch, policy)
    } else {
        once
    }
}

/// Scaled size, truncated toward zero.
fn scale(size: usize, factor: f64) -> usize {
    (size as f64 * factor) as usize
}

/// Why the batch size changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeReason {
    /// Batch finished under the fast threshold.
    Fast,
    /// Batch finished over the slow threshold.
    Slow,
    /// Fixed-mode additive growth.
    FixedCreep,
    /// Attempt failed.
    Failure,
    /// Attempt failed with a timeout/size signature; shrunk twice.
    TransientFailure,
}

impl fmt::Display for ResizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fast => "fast batch",
            Self::Slow => "slow batch",
            Self::FixedCreep => "fixed-mode growth",
            Self::Failure => "insert failed",
            Self::TransientFailure => "transient failure",
        };
        f.write_str(s)
    }
}

/// A batch size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub from: usize,
    pub to: usize,
    pub reason: ResizeReason,
}

/// Throughput numbers for one successful attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub rows_per_sec: f64,
    pub ewma_rows_per_sec: f64,
    pub resize: Option<Resize>,
}

/// Current batch size plus throughput estimate for one table load.
#[derive(Debug, Clone)]
pub struct BatchSizeController {
    policy: RetryPolicy,
    current: usize,
    ewma: Ewma,
}

impl BatchSizeController {
    pub fn new(policy: RetryPolicy) -> Self {
        let current = policy.initial_batch();
        Self {
            policy,
            current,
            ewma: Ewma::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn ewma_rows_per_sec(&self) -> Option<f64> {
        self.ewma.value()
    }

    /// Record a successful attempt of `rows` rows and pick the next size.
    pub fn on_success(&mut self, rows: usize, elapsed: Duration) -> Measurement {
        let rate = rows_per_sec(rows, elapsed);
        let ewma_rows_per_sec = self.ewma.update(rate);

        let secs = elapsed.as_secs_f64();
        let from = self.current;
        let to = next_batch_size(from, secs, true, self.policy.fixed_batch, &self.policy);
        self.current = to;

        let resize = (to != from).then(|| Resize {
            from,
            to,
            reason: if self.policy.fixed_batch {
                ResizeReason::FixedCreep
            } else if to > from {
                ResizeReason::Fast
            } else {
                ResizeReason::Slow
            },
        });

        Measurement {
            rows_per_sec: rate,
            ewma_rows_per_sec,
            resize,
        }
    }

    /// Shrink after a failed attempt. Returns the change, if the size moved.
    pub fn on_failure(&mut self, accelerated: bool) -> Option<Resize> {
        let from = self.current;
        let to = shrink_after_failure(from, accelerated, &self.policy);
        self.current = to;
        (to != from).then_some(Resize {
            from,
            to,
            reason: if accelerated {
                ResizeReason::TransientFailure
            } else {
                ResizeReason::Failure
            },
        })
    }
}
