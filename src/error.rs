use thiserror::Error;

use crate::adaptive::SkippedRow;
use crate::destination::DestinationError;

/// Convenience result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type returned by reading, planning and loading a table.
///
/// Batch-level insert failures are not errors at this level: the executor retries, shrinks and
/// falls back on its own. Only failures it cannot recover from surface as [`LoadError::Terminal`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV source error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook source error (with the `excel` feature).
    #[cfg(feature = "excel")]
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// JSON source error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The TOML configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Missing or invalid required input. Fatal, never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A source value could not be turned into a cell.
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    Parse {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// A schema statement (drop/create) was rejected by the destination.
    #[error("destination error: {0}")]
    Destination(#[from] DestinationError),

    /// The load could not make progress at `offset` and was aborted.
    ///
    /// Rows before `offset` were either committed (`sent_rows` of them) or skipped during an
    /// earlier row-level fallback (`skipped_rows`).
    #[error(
        "load of '{table}' aborted at row offset {offset} ({sent_rows} rows committed, {} skipped): {message}",
        .skipped_rows.len()
    )]
    Terminal {
        table: String,
        offset: usize,
        message: String,
        sent_rows: usize,
        skipped_rows: Vec<SkippedRow>,
    },
}

impl LoadError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
