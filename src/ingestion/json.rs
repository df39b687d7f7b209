//! JSON source reader.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single object
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! Columns are the union of keys in first-seen order; a key missing from a record is a null
//! cell. Scalars become their text, nested arrays/objects their compact JSON text. A column whose
//! non-null values are all JSON booleans is tagged [`ColumnKind::Boolean`].

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{LoadError, LoadResult};
use crate::types::{ColumnKind, Row, RowSet, SourceColumn};

use super::unified::{map_headers, SourceOptions};

/// Read a JSON file into a [`RowSet`].
pub fn read_json_from_path(path: impl AsRef<Path>, options: &SourceOptions) -> LoadResult<RowSet> {
    let text = fs::read_to_string(path)?;
    read_json_from_str(&text, options)
}

/// Read JSON from an in-memory string into a [`RowSet`].
pub fn read_json_from_str(input: &str, options: &SourceOptions) -> LoadResult<RowSet> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LoadError::validation("json input is empty"));
    }

    // First try parsing as a single JSON value (array or object).
    let values = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items,
        Ok(v @ Value::Object(_)) => vec![v],
        Ok(_) => {
            return Err(LoadError::validation(
                "json must be an object, an array of objects, or NDJSON",
            ));
        }
        Err(_) => parse_ndjson(trimmed)?,
    };

    let records = values
        .iter()
        .enumerate()
        .map(|(idx0, v)| {
            v.as_object()
                .ok_or_else(|| LoadError::validation(format!("row {} is not a json object", idx0 + 1)))
        })
        .collect::<LoadResult<Vec<&Map<String, Value>>>>()?;

    let mut keys: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }

    let rows: Vec<Row> = records
        .iter()
        .map(|record| {
            keys.iter()
                .map(|k| record.get(k).and_then(|v| cell_text(v, options)))
                .collect()
        })
        .collect();

    let names = map_headers(keys.clone(), &options.column_mappings)?;
    let columns = names
        .into_iter()
        .zip(keys.iter())
        .map(|(name, key)| {
            let mut present = records.iter().filter_map(|r| r.get(key)).filter(|v| !v.is_null());
            let first = present.next();
            let is_bool = first.is_some_and(Value::is_boolean) && present.all(Value::is_boolean);
            SourceColumn {
                name,
                kind: if is_bool {
                    ColumnKind::Boolean
                } else {
                    ColumnKind::Text
                },
            }
        })
        .collect();

    Ok(RowSet::new(columns, rows))
}

fn parse_ndjson(text: &str) -> LoadResult<Vec<Value>> {
    let mut values = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v = serde_json::from_str::<Value>(line).map_err(|e| LoadError::Parse {
            row: i + 1,
            column: String::new(),
            raw: line.chars().take(80).collect(),
            message: format!("invalid ndjson: {e}"),
        })?;
        values.push(v);
    }
    Ok(values)
}

fn cell_text(v: &Value, options: &SourceOptions) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!options.is_null(trimmed)).then(|| s.clone())
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}
