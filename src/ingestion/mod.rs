//! Source readers.
//!
//! Most callers should use [`read_source`] (from [`unified`]) which:
//!
//! - auto-detects format by file extension (or you can override via [`SourceOptions`])
//! - reads every row into an in-memory [`crate::types::RowSet`] of string-or-null cells
//!
//! Format-specific functions are also available under:
//! - [`csv`]
//! - [`json`]
//! - `excel` (with the `excel` feature)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod json;
pub mod unified;

pub use unified::{read_source, SourceFormat, SourceOptions};
