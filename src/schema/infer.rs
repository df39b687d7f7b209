//! Column type inference over a fully materialized [`RowSet`].

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::error::{LoadError, LoadResult};
use crate::types::{ColumnDescriptor, ColumnKind, InferredType, RowSet};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Infer one [`ColumnDescriptor`] per column of `rows`.
///
/// Each column takes the first type in this order that every non-null value satisfies:
/// integer, float, date/time. Otherwise a column the source tagged as
/// [`ColumnKind::Boolean`] becomes [`InferredType::Boolean`] (text of width 10) and anything else
/// becomes [`InferredType::String`].
///
/// The maximum value length is tracked for every column whatever type wins, so a column that is
/// later overridden to text is never sized from a default.
pub fn infer_columns(rows: &RowSet) -> Vec<ColumnDescriptor> {
    rows.columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let mut scan = ColumnScan::new();
            for row in &rows.rows {
                scan.observe(row.get(idx).and_then(|c| c.as_deref()));
            }
            scan.finish(&col.name, col.kind)
        })
        .collect()
}

/// Replace inferred types with explicit ones.
///
/// `overrides` maps column name to a type name (see [`parse_type_name`]). Lengths observed during
/// inference are kept. Unknown columns or type names are validation errors.
pub fn apply_type_overrides(
    mut descriptors: Vec<ColumnDescriptor>,
    overrides: &BTreeMap<String, String>,
) -> LoadResult<Vec<ColumnDescriptor>> {
    for (column, type_name) in overrides {
        let inferred_type = parse_type_name(type_name).ok_or_else(|| {
            LoadError::validation(format!(
                "unsupported dtype '{type_name}' for column '{column}'"
            ))
        })?;
        let desc = descriptors
            .iter_mut()
            .find(|d| &d.name == column)
            .ok_or_else(|| {
                LoadError::validation(format!("dtype given for unknown column '{column}'"))
            })?;
        desc.inferred_type = inferred_type;
    }
    Ok(descriptors)
}

/// Parse a configuration type name (case-insensitive).
pub fn parse_type_name(name: &str) -> Option<InferredType> {
    match name.trim().to_ascii_uppercase().as_str() {
        "INT" | "INTEGER" | "BIGINT" => Some(InferredType::Integer),
        "FLOAT" | "DOUBLE" | "REAL" => Some(InferredType::Float),
        "NUMERIC" | "DECIMAL" => Some(InferredType::Decimal),
        "DATE" => Some(InferredType::Date),
        "DATETIME" | "TIMESTAMP" => Some(InferredType::DateTime),
        "TEXT" | "STRING" | "NVARCHAR" | "VARCHAR" => Some(InferredType::String),
        "BOOL" | "BOOLEAN" => Some(InferredType::Boolean),
        _ => None,
    }
}

pub(crate) fn is_integer(s: &str) -> bool {
    s.parse::<i64>().is_ok()
}

pub(crate) fn is_float(s: &str) -> bool {
    s.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

/// `DATETIME2` stores at most 100ns precision.
const MAX_FRACTION_DIGITS: usize = 7;

/// Date/time forms the destination converts to `DATETIME2` without a style code.
///
/// Years must fall in `0001..=9999` and fractional seconds may carry at most
/// [`MAX_FRACTION_DIGITS`] digits.
pub(crate) fn is_datetime(s: &str) -> bool {
    let s = s.strip_suffix('Z').unwrap_or(s);
    if fraction_digits(s) > MAX_FRACTION_DIGITS {
        return false;
    }
    let in_range = |d: NaiveDate| (1..=9999).contains(&d.year());
    DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .any(|dt| in_range(dt.date()))
        || DATE_FORMATS
            .iter()
            .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
            .any(in_range)
}

/// Digits after the seconds' decimal point, 0 when there is no time part.
fn fraction_digits(s: &str) -> usize {
    match s.rsplit_once('.') {
        Some((head, tail)) if head.contains(':') => {
            tail.chars().take_while(char::is_ascii_digit).count()
        }
        _ => 0,
    }
}

struct ColumnScan {
    non_null: usize,
    nullable: bool,
    all_integer: bool,
    all_float: bool,
    all_datetime: bool,
    max_length: usize,
}

impl ColumnScan {
    fn new() -> Self {
        Self {
            non_null: 0,
            nullable: false,
            all_integer: true,
            all_float: true,
            all_datetime: true,
            max_length: 0,
        }
    }

    fn observe(&mut self, cell: Option<&str>) {
        let Some(v) = cell else {
            self.nullable = true;
            return;
        };
        self.non_null += 1;
        // NVARCHAR widths count UTF-16 code units.
        self.max_length = self.max_length.max(v.encode_utf16().count());

        // Each candidate must hold for every value, so none of the checks may be skipped.
        if self.all_integer && !is_integer(v) {
            self.all_integer = false;
        }
        if self.all_float && !is_float(v) {
            self.all_float = false;
        }
        if self.all_datetime && !is_datetime(v) {
            self.all_datetime = false;
        }
    }

    fn finish(self, name: &str, kind: ColumnKind) -> ColumnDescriptor {
        let inferred_type = if self.non_null == 0 {
            match kind {
                ColumnKind::Boolean => InferredType::Boolean,
                ColumnKind::Text => InferredType::String,
            }
        } else if self.all_integer {
            InferredType::Integer
        } else if self.all_float {
            InferredType::Float
        } else if self.all_datetime {
            InferredType::DateTime
        } else if kind == ColumnKind::Boolean {
            InferredType::Boolean
        } else {
            InferredType::String
        };

        ColumnDescriptor {
            name: name.to_string(),
            inferred_type,
            max_length: self.max_length.max(1),
            nullable: self.nullable,
        }
    }
}
