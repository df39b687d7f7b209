use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};

/// What row-level fallback does with a row that fails on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFallbackPolicy {
    /// Record the row as skipped and keep going through the window. The load only fails if every
    /// row of the window failed.
    #[default]
    SkipFailedRows,
    /// Abort the load on the first row that fails.
    AbortOnFirstFailure,
}

/// Batch sizing and retry configuration for one table load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Batch size for the first attempt (clamped into `[min_batch, max_batch]`).
    pub start_batch: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    /// Desired wall time per batch, in seconds.
    pub target_seconds: f64,
    /// Grow when a batch takes less than `fast_ratio * target_seconds`.
    pub fast_ratio: f64,
    /// Shrink when a batch takes more than `slow_ratio * target_seconds`.
    pub slow_ratio: f64,
    pub inc_factor: f64,
    pub dec_factor: f64,
    /// Consecutive failures at one offset before falling back to single rows.
    pub max_retries: u32,
    /// Keep the batch size near `start_batch`: creep up additively on success, never shrink on
    /// success.
    pub fixed_batch: bool,
    /// Sleep before the first retry; doubles per consecutive failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub row_fallback: RowFallbackPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            start_batch: 5_000,
            min_batch: 1_000,
            max_batch: 50_000,
            target_seconds: 3.0,
            fast_ratio: 0.75,
            slow_ratio: 1.5,
            inc_factor: 1.2,
            dec_factor: 0.8,
            max_retries: 5,
            fixed_batch: false,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
            row_fallback: RowFallbackPolicy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn fast_threshold(&self) -> f64 {
        self.fast_ratio * self.target_seconds
    }

    pub fn slow_threshold(&self) -> f64 {
        self.slow_ratio * self.target_seconds
    }

    /// `size` forced into `[min_batch, max_batch]`.
    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min_batch, self.max_batch)
    }

    /// Batch size for the first attempt.
    pub fn initial_batch(&self) -> usize {
        self.clamp(self.start_batch)
    }

    /// Delay before retrying after `consecutive_failures` failures at one offset.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let shift = (consecutive_failures - 1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << shift)
            .min(self.backoff_max)
    }

    /// Reject settings the controller cannot honor.
    pub fn validate(&self) -> LoadResult<()> {
        let fail = |msg: String| Err(LoadError::validation(msg));
        if self.min_batch == 0 {
            return fail("min_batch must be > 0".to_string());
        }
        if self.min_batch > self.max_batch {
            return fail(format!(
                "min_batch ({}) must not exceed max_batch ({})",
                self.min_batch, self.max_batch
            ));
        }
        if !(self.target_seconds.is_finite() && self.target_seconds > 0.0) {
            return fail(format!("target_seconds must be > 0 (got {})", self.target_seconds));
        }
        if !(self.fast_ratio > 0.0 && self.fast_ratio <= self.slow_ratio) {
            return fail(format!(
                "fast_ratio ({}) must be > 0 and <= slow_ratio ({})",
                self.fast_ratio, self.slow_ratio
            ));
        }
        if !(self.inc_factor >= 1.0) {
            return fail(format!("inc_factor must be >= 1 (got {})", self.inc_factor));
        }
        if !(self.dec_factor > 0.0 && self.dec_factor < 1.0) {
            return fail(format!("dec_factor must be in (0, 1) (got {})", self.dec_factor));
        }
        if self.max_retries == 0 {
            return fail("max_retries must be > 0".to_string());
        }
        Ok(())
    }
}
