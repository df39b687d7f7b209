//! Unified source entrypoint.
//!
//! Most callers should use [`read_source`], which reads a file into a [`RowSet`].
//!
//! - If [`SourceOptions::format`] is `None`, the format is inferred from the file extension.
//! - `null_values` and empty cells become nulls; `column_mappings` renames headers.
//! - Workbooks (`xlsx`, `xls`, `ods`, ...) need the `excel` cargo feature.
//! - Columns whose every non-null value is a boolean are tagged [`ColumnKind::Boolean`] with
//!   cells normalized to `true` / `false`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};
use crate::types::{ColumnKind, RowSet, SourceColumn};

use super::{csv, json};

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Delimited text with a header row.
    Csv,
    /// JSON array-of-objects or NDJSON.
    Json,
    /// Spreadsheet workbooks (read with the `excel` feature).
    Excel,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "json" | "ndjson" | "jsonl" => Some(Self::Json),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// Options controlling how a source becomes rows.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    /// If `None`, auto-detect format from file extension.
    pub format: Option<SourceFormat>,
    /// CSV field delimiter.
    pub delimiter: u8,
    /// Cell values (after trimming) treated as null, in addition to empty cells.
    pub null_values: Vec<String>,
    /// Source header -> destination column name.
    pub column_mappings: BTreeMap<String, String>,
    /// Workbook sheet to read; `None` reads the first sheet. Ignored for other formats.
    pub sheet: Option<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            format: None,
            delimiter: b',',
            null_values: Vec::new(),
            column_mappings: BTreeMap::new(),
            sheet: None,
        }
    }
}

impl SourceOptions {
    pub(crate) fn is_null(&self, trimmed: &str) -> bool {
        trimmed.is_empty() || self.null_values.iter().any(|n| n == trimmed)
    }
}

/// Read a file into a [`RowSet`].
///
/// ```no_run
/// use rust_bulk_loader::ingestion::{read_source, SourceOptions};
///
/// # fn main() -> Result<(), rust_bulk_loader::LoadError> {
/// let opts = SourceOptions {
///     null_values: vec!["NA".to_string()],
///     ..Default::default()
/// };
/// let rows = read_source("orders.csv", &opts)?;
/// println!("rows={}", rows.row_count());
/// # Ok(())
/// # }
/// ```
pub fn read_source(path: impl AsRef<Path>, options: &SourceOptions) -> LoadResult<RowSet> {
    let path = path.as_ref();
    let format = match options.format {
        Some(f) => f,
        None => infer_format_from_path(path)?,
    };

    let rows = match format {
        SourceFormat::Csv => csv::read_csv_from_path(path, options)?,
        SourceFormat::Json => json::read_json_from_path(path, options)?,
        SourceFormat::Excel => read_excel_dispatch(path, options)?,
    };
    tracing::info!(
        path = %path.display(),
        format = ?format,
        rows = rows.row_count(),
        columns = rows.columns.len(),
        "read source"
    );
    Ok(rows)
}

fn read_excel_dispatch(path: &Path, options: &SourceOptions) -> LoadResult<RowSet> {
    #[cfg(feature = "excel")]
    {
        super::excel::read_excel_from_path(path, options)
    }

    #[cfg(not(feature = "excel"))]
    {
        let _ = options;
        Err(LoadError::validation(format!(
            "cannot read workbook {}: excel support not enabled (enable cargo feature 'excel')",
            path.display()
        )))
    }
}

fn infer_format_from_path(path: &Path) -> LoadResult<SourceFormat> {
    let ext = path.extension().and_then(|s| s.to_str()).ok_or_else(|| {
        LoadError::validation(format!(
            "cannot infer format: path has no extension ({})",
            path.display()
        ))
    })?;

    SourceFormat::from_extension(ext).ok_or_else(|| {
        LoadError::validation(format!(
            "cannot infer format from extension '{ext}' for path ({})",
            path.display()
        ))
    })
}

/// Rename headers per `mappings` and reject empty or duplicate names.
pub(crate) fn map_headers(
    headers: Vec<String>,
    mappings: &BTreeMap<String, String>,
) -> LoadResult<Vec<String>> {
    for source in mappings.keys() {
        if !headers.iter().any(|h| h == source) {
            tracing::warn!(column = %source, "column mapping refers to a column not in the source");
        }
    }

    let mut seen = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(idx, h)| {
            let name = mappings.get(&h).cloned().unwrap_or(h);
            if name.trim().is_empty() {
                return Err(LoadError::validation(format!(
                    "column {} has an empty name",
                    idx + 1
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(LoadError::validation(format!(
                    "duplicate column name '{name}'"
                )));
            }
            Ok(name)
        })
        .collect()
}

/// Tag columns whose every non-null cell reads as a boolean and normalize those cells.
///
/// Columns with no non-null cells are left as text.
pub(crate) fn tag_boolean_columns(rows: &mut RowSet) {
    for (idx, column) in rows.columns.iter_mut().enumerate() {
        let mut any = false;
        let all_bool = rows
            .rows
            .iter()
            .filter_map(|r| r.get(idx).and_then(|c| c.as_deref()))
            .all(|v| {
                any = true;
                parse_bool(v).is_some()
            });
        if !(any && all_bool) {
            continue;
        }
        column.kind = ColumnKind::Boolean;
        for row in rows.rows.iter_mut() {
            if let Some(Some(cell)) = row.get_mut(idx) {
                if let Some(b) = parse_bool(cell) {
                    *cell = b.to_string();
                }
            }
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

pub(crate) fn columns_from_names(names: Vec<String>) -> Vec<SourceColumn> {
    names.into_iter().map(SourceColumn::new).collect()
}
