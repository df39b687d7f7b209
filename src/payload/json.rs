//! Batch ⇄ JSON array-of-objects.
//!
//! Every non-null cell is written as a JSON *string*, whatever its inferred type; the
//! `OPENJSON ... WITH` clause does the typed conversion on the destination side. Null cells are
//! written as JSON `null`.

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use crate::error::{LoadError, LoadResult};
use crate::types::Row;

/// Serialize `rows` as a JSON array of objects keyed by `columns`, in column order.
pub fn encode_rows(columns: &[&str], rows: &[Row]) -> LoadResult<String> {
    Ok(serde_json::to_string(&JsonRows { columns, rows })?)
}

/// Parse a JSON array produced by [`encode_rows`] back into rows.
///
/// Missing keys and JSON `null` both become null cells. Non-string scalars are kept as their JSON
/// text so payloads written by other tools still decode.
pub fn decode_rows(columns: &[&str], json: &str) -> LoadResult<Vec<Row>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items = value
        .as_array()
        .ok_or_else(|| LoadError::validation("payload is not a json array"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item.as_object().ok_or_else(|| {
                LoadError::validation(format!("payload row {} is not a json object", i + 1))
            })?;
            Ok(columns
                .iter()
                .map(|c| match obj.get(*c) {
                    None | Some(serde_json::Value::Null) => None,
                    Some(serde_json::Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                })
                .collect())
        })
        .collect()
}

struct JsonRows<'a> {
    columns: &'a [&'a str],
    rows: &'a [Row],
}

struct JsonRow<'a> {
    columns: &'a [&'a str],
    row: &'a Row,
}

impl Serialize for JsonRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in self.rows {
            seq.serialize_element(&JsonRow {
                columns: self.columns,
                row,
            })?;
        }
        seq.end()
    }
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (idx, name) in self.columns.iter().enumerate() {
            // Short rows are padded with nulls rather than dropping the key.
            let cell = self.row.get(idx).and_then(|c| c.as_deref());
            map.serialize_entry(name, &cell)?;
        }
        map.end()
    }
}
