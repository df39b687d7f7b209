//! `rust-bulk-loader` loads tabular data into SQL Server with `INSERT ... SELECT ... FROM
//! OPENJSON(...)` batch statements, tuning the batch size to how fast the destination accepts
//! them.
//!
//! The primary entrypoint is [`load::load_table`], which infers column types from a
//! [`types::RowSet`], creates the table if needed, and sends the rows in adaptive batches through
//! a caller-supplied [`destination::Destination`].
//!
//! ## How a load runs
//!
//! - **Inference**: each column becomes `BIGINT`, `FLOAT`, `DATETIME2` or `NVARCHAR(n)`
//!   depending on what every non-null value parses as; native boolean columns become
//!   `NVARCHAR(10)` holding `true` / `false`.
//! - **Payload**: every batch is one statement carrying its rows as an inline JSON array of string
//!   values, optionally gzip-compressed and base64-encoded, unpacked server-side with
//!   `DECOMPRESS`. A statement lands all of its rows or none.
//! - **Batch sizing**: batches faster than 75% of `target_seconds` grow by 20%, batches slower
//!   than 150% shrink by 20%, always within `[min_batch, max_batch]`. Throughput is tracked as an
//!   EWMA (α = 0.25).
//! - **Failures**: a failed batch shrinks (twice for timeouts and size errors), backs off, and is
//!   retried from the same offset. After `max_retries` failures at one offset the failed range is
//!   sent one row at a time; rows that still fail are skipped and reported.
//!
//! ## Quick example: load rows into a SQL script
//!
//! ```rust
//! use rust_bulk_loader::destination::ScriptDestination;
//! use rust_bulk_loader::load::{load_table, LoadOptions};
//! use rust_bulk_loader::types::{RowSet, SourceColumn};
//!
//! # fn main() -> Result<(), rust_bulk_loader::LoadError> {
//! let rows = RowSet::new(
//!     vec![SourceColumn::new("id"), SourceColumn::boolean("active")],
//!     vec![
//!         vec![Some("1".to_string()), Some("true".to_string())],
//!         vec![Some("2".to_string()), None],
//!     ],
//! );
//! let mut script = ScriptDestination::new(Vec::new());
//! let summary = load_table(&mut script, "dbo.accounts", &rows, &LoadOptions::default())?;
//! assert_eq!(summary.sent_rows, 2);
//!
//! let sql = String::from_utf8(script.into_inner()).unwrap();
//! assert!(sql.contains("[active] NVARCHAR(10) NULL"));
//! assert!(sql.contains("FROM OPENJSON("));
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading sources
//!
//! ```no_run
//! use rust_bulk_loader::ingestion::{read_source, SourceOptions};
//!
//! # fn main() -> Result<(), rust_bulk_loader::LoadError> {
//! // Auto-detects by extension (.csv / .json / .ndjson).
//! let rows = read_source("orders.csv", &SourceOptions::default())?;
//! println!("rows={}", rows.row_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: row set and column descriptor types
//! - [`schema`]: type inference and DDL
//! - [`payload`]: per-batch JSON payloads and insert statements
//! - [`adaptive`]: batch sizing policy, controller and the retry/fallback state machine
//! - [`load`]: per-table orchestration, observers and the parallel multi-table runner
//! - [`destination`]: the destination trait and a SQL script destination
//! - [`ingestion`]: CSV / JSON source readers, plus workbooks with the `excel` feature
//! - [`config`]: TOML configuration
//! - [`logging`]: tracing subscriber setup
//! - [`error`]: error types used across the crate

pub mod adaptive;
pub mod config;
pub mod destination;
pub mod error;
pub mod ingestion;
pub mod load;
pub mod logging;
pub mod payload;
pub mod schema;
pub mod types;

pub use error::{LoadError, LoadResult};
