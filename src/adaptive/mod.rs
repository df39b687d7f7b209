//! Adaptive batching: sizing policy, EWMA-driven size controller and the retry/fallback state
//! machine.
//!
//! - [`policy`]: [`RetryPolicy`] knobs and validation
//! - [`controller`]: pure [`next_batch_size`] plus [`BatchSizeController`]
//! - [`executor`]: [`LoadState`], the explicit state machine the load loop drives

pub mod controller;
pub mod executor;
pub mod policy;

pub use controller::{
    next_batch_size, rows_per_sec, shrink_after_failure, BatchSizeController, Ewma, Measurement, Resize,
    ResizeReason, EWMA_ALPHA,
};
pub use executor::{Attempt, LoadState, Outcome, Phase, SkippedRow, Step};
pub use policy::{RetryPolicy, RowFallbackPolicy};
