//! CSV source reader.

use std::path::Path;

use crate::error::{LoadError, LoadResult};
use crate::types::{Row, RowSet};

use super::unified::{columns_from_names, map_headers, tag_boolean_columns, SourceOptions};

/// Read a CSV file into a [`RowSet`].
///
/// Rules:
///
/// - CSV must have a header row; every record must have as many fields as the header.
/// - Cells are trimmed; empty cells and `null_values` become nulls.
/// - Boolean-looking columns are tagged (see [`super::unified`]).
pub fn read_csv_from_path(path: impl AsRef<Path>, options: &SourceOptions) -> LoadResult<RowSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .from_path(path)?;
    read_csv_from_reader(&mut rdr, options)
}

/// Read CSV data from an existing CSV reader.
pub fn read_csv_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
    options: &SourceOptions,
) -> LoadResult<RowSet> {
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let names = map_headers(headers, &options.column_mappings)?;

    let mut rows: Vec<Row> = Vec::new();
    for (row_idx0, result) in rdr.byte_records().enumerate() {
        // Report 1-based row number for users; +1 again because header is row 1.
        let user_row = row_idx0 + 2;
        let record = result?;

        let mut row: Row = Vec::with_capacity(names.len());
        for (field, column) in record.iter().zip(names.iter()) {
            let raw = std::str::from_utf8(field).map_err(|e| LoadError::Parse {
                row: user_row,
                column: column.clone(),
                raw: String::from_utf8_lossy(field).into_owned(),
                message: e.to_string(),
            })?;
            let trimmed = raw.trim();
            row.push((!options.is_null(trimmed)).then(|| trimmed.to_owned()));
        }
        rows.push(row);
    }

    let mut set = RowSet::new(columns_from_names(names), rows);
    tag_boolean_columns(&mut set);
    Ok(set)
}
