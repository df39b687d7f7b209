#![cfg(feature = "excel")]

//! Workbook source reader (`.xlsx`, `.xlsm`, `.xls`, `.ods`).

use std::path::Path;

use calamine::{open_workbook_auto, CellErrorType, Data, Reader};
use chrono::Timelike;

use crate::error::{LoadError, LoadResult};
use crate::types::{Row, RowSet};

use super::unified::{columns_from_names, map_headers, tag_boolean_columns, SourceOptions};

/// Read one sheet of a workbook into a [`RowSet`].
///
/// Rules:
///
/// - Uses [`SourceOptions::sheet`] if set, otherwise the first sheet in the workbook.
/// - The first non-empty row is the header row; rows with no values at all are dropped.
/// - Numbers that are whole become integer text (`3.0` -> `"3"`), dates become ISO 8601 and
///   `#N/A` cells are nulls. Any other error cell fails the read.
/// - Text cells are trimmed; empty cells and `null_values` become nulls.
pub fn read_excel_from_path(path: impl AsRef<Path>, options: &SourceOptions) -> LoadResult<RowSet> {
    let mut workbook = open_workbook_auto(path)?;
    let sheets = workbook.sheet_names().to_vec();
    let sheet = match &options.sheet {
        Some(name) if sheets.iter().any(|s| s == name) => name.clone(),
        Some(name) => {
            return Err(LoadError::validation(format!(
                "sheet '{name}' not found; sheets={sheets:?}"
            )));
        }
        None => sheets
            .first()
            .cloned()
            .ok_or_else(|| LoadError::validation("workbook has no sheets"))?,
    };
    let range = workbook.worksheet_range(&sheet)?;
    read_sheet_range(&sheet, &range, options)
}

fn read_sheet_range(sheet: &str, range: &calamine::Range<Data>, options: &SourceOptions) -> LoadResult<RowSet> {
    // Report sheet row numbers (1-based), not offsets into the used range.
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

    let mut body = range.rows().enumerate().filter(|(_, row)| !is_blank(row));
    let (_, header) = body.next().ok_or_else(|| {
        LoadError::validation(format!(
            "sheet '{sheet}' has no non-empty rows (no header row found)"
        ))
    })?;
    let headers: Vec<String> = header.iter().map(|c| display_cell(c).trim().to_string()).collect();
    let names = map_headers(headers, &options.column_mappings)?;

    let mut rows: Vec<Row> = Vec::new();
    for (idx0, cells) in body {
        let user_row = first_row + idx0 + 1;
        let mut row: Row = Vec::with_capacity(names.len());
        for (idx, column) in names.iter().enumerate() {
            let cell = cells.get(idx).unwrap_or(&Data::Empty);
            let value = cell_text(cell).map_err(|message| LoadError::Parse {
                row: user_row,
                column: format!("{sheet}:{column}"),
                raw: display_cell(cell),
                message,
            })?;
            row.push(value.filter(|v| !options.is_null(v)));
        }
        rows.push(row);
    }

    let mut set = RowSet::new(columns_from_names(names), rows);
    tag_boolean_columns(&mut set);
    Ok(set)
}

fn is_blank(row: &[Data]) -> bool {
    row.iter().all(|c| match c {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

/// Trimmed text for one cell, `None` for empty and `#N/A` cells.
fn cell_text(cell: &Data) -> Result<Option<String>, String> {
    let text = match cell {
        Data::Empty | Data::Error(CellErrorType::NA) => return Ok(None),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_text(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) if !dt.is_duration() => match dt.as_datetime() {
            Some(value) if value.nanosecond() == 0 => {
                value.format("%Y-%m-%dT%H:%M:%S").to_string()
            }
            Some(value) => value.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            None => return Err("date serial out of range".to_string()),
        },
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(e) => return Err(format!("cell holds spreadsheet error {e:?}")),
    };
    Ok(Some(text))
}

/// Workbooks store every number as a double; whole values read back as integers.
fn float_text(f: f64) -> String {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if f.fract() == 0.0 && f.abs() <= MAX_EXACT {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

fn display_cell(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Float(f) => float_text(*f),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use calamine::{CellErrorType, Data, Range};

    use super::{cell_text, read_sheet_range};
    use crate::error::LoadError;
    use crate::ingestion::SourceOptions;
    use crate::types::ColumnKind;

    fn sheet(cells: Vec<Vec<Data>>) -> Range<Data> {
        let height = cells.len() as u32;
        let width = cells.iter().map(Vec::len).max().unwrap_or(0) as u32;
        let mut range = Range::new((0, 0), (height - 1, width - 1));
        for (r, row) in cells.into_iter().enumerate() {
            for (c, cell) in row.into_iter().enumerate() {
                range.set_value((r as u32, c as u32), cell);
            }
        }
        range
    }

    fn s(v: &str) -> Data {
        Data::String(v.to_string())
    }

    #[test]
    fn numbers_render_like_their_source_text() {
        assert_eq!(cell_text(&Data::Float(3.0)).unwrap().as_deref(), Some("3"));
        assert_eq!(cell_text(&Data::Float(98.5)).unwrap().as_deref(), Some("98.5"));
        assert_eq!(cell_text(&Data::Int(-7)).unwrap().as_deref(), Some("-7"));
        assert_eq!(cell_text(&Data::Bool(true)).unwrap().as_deref(), Some("true"));
        assert_eq!(cell_text(&s("  ada ")).unwrap().as_deref(), Some("ada"));
        assert_eq!(cell_text(&Data::Empty).unwrap(), None);
    }

    #[test]
    fn error_cells() {
        assert_eq!(cell_text(&Data::Error(CellErrorType::NA)).unwrap(), None);
        assert!(cell_text(&Data::Error(CellErrorType::Div0)).is_err());
    }

    #[test]
    fn header_is_the_first_non_empty_row() {
        let range = sheet(vec![
            vec![Data::Empty, Data::Empty, Data::Empty],
            vec![s("id"), s(" name "), s("active")],
            vec![Data::Float(1.0), s("ada"), Data::Bool(true)],
            vec![Data::Empty, Data::Empty, Data::Empty],
            vec![Data::Float(2.0), s("NA"), Data::Bool(false)],
        ]);
        let opts = SourceOptions {
            null_values: vec!["NA".to_string()],
            ..Default::default()
        };
        let set = read_sheet_range("Sheet1", &range, &opts).unwrap();
        assert_eq!(set.column_names().collect::<Vec<_>>(), vec!["id", "name", "active"]);
        assert_eq!(set.row_count(), 2);
        assert_eq!(set.rows[0][0].as_deref(), Some("1"));
        assert_eq!(set.rows[1][1], None);
        assert_eq!(set.columns[2].kind, ColumnKind::Boolean);
    }

    #[test]
    fn error_cells_report_sheet_row_and_column() {
        let range = sheet(vec![
            vec![s("id"), s("ratio")],
            vec![Data::Float(1.0), Data::Float(0.5)],
            vec![Data::Float(2.0), Data::Error(CellErrorType::Div0)],
        ]);
        match read_sheet_range("Data", &range, &SourceOptions::default()).unwrap_err() {
            LoadError::Parse { row, column, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "Data:ratio");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_sheet_has_no_header() {
        let range = sheet(vec![vec![Data::Empty]]);
        let err = read_sheet_range("Empty", &range, &SourceOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no header row found"));
    }
}
