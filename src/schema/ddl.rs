//! DDL rendering: destination column types, identifier quoting and guarded create/drop.

use crate::error::{LoadError, LoadResult};
use crate::types::{ColumnDescriptor, InferredType};

/// Widest `NVARCHAR(n)`; anything longer becomes `NVARCHAR(MAX)`.
pub const MAX_FIXED_LENGTH: usize = 4000;

/// Destination type for [`InferredType::Decimal`] columns.
pub const DECIMAL_SQL_TYPE: &str = "NUMERIC(18,4)";

/// Quote a single identifier as `[name]`, doubling any embedded `]`.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a possibly schema-qualified table name (`dbo.orders` → `[dbo].[orders]`).
///
/// Names already wrapped in brackets are taken verbatim.
pub fn quote_table(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return trimmed.to_string();
    }
    trimmed
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Destination type for a descriptor. Also used in the `OPENJSON ... WITH` clause.
pub fn sql_type(desc: &ColumnDescriptor) -> String {
    match desc.inferred_type {
        InferredType::Integer => "BIGINT".to_string(),
        InferredType::Float => "FLOAT".to_string(),
        InferredType::DateTime => "DATETIME2".to_string(),
        InferredType::Date => "DATE".to_string(),
        InferredType::Decimal => DECIMAL_SQL_TYPE.to_string(),
        InferredType::String | InferredType::Boolean => {
            // text_length() is always Some for the string-like types
            let len = desc.text_length().unwrap_or(1);
            if len <= MAX_FIXED_LENGTH {
                format!("NVARCHAR({len})")
            } else {
                "NVARCHAR(MAX)".to_string()
            }
        }
    }
}

/// `CREATE TABLE` guarded by an existence check, so it is safe to run against a table that is
/// already there.
pub fn create_table_sql(table: &str, columns: &[ColumnDescriptor]) -> LoadResult<String> {
    validate(table, columns)?;
    let quoted = quote_table(table);
    let defs = columns
        .iter()
        .map(|c| {
            format!(
                "        {} {} {}",
                quote_ident(&c.name),
                sql_type(c),
                if c.nullable { "NULL" } else { "NOT NULL" }
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    Ok(format!(
        "IF OBJECT_ID(N'{obj}', N'U') IS NULL\nBEGIN\n    CREATE TABLE {quoted} (\n{defs}\n    );\nEND",
        obj = escape_literal(&quoted),
    ))
}

/// `DROP TABLE` guarded by an existence check (for the `replace` policy).
pub fn drop_table_sql(table: &str) -> LoadResult<String> {
    if table.trim().is_empty() {
        return Err(LoadError::validation("table name is empty"));
    }
    let quoted = quote_table(table);
    Ok(format!(
        "IF OBJECT_ID(N'{obj}', N'U') IS NOT NULL\n    DROP TABLE {quoted};",
        obj = escape_literal(&quoted),
    ))
}

/// Escape text for use inside a `'...'` / `N'...'` literal.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

pub(crate) fn validate(table: &str, columns: &[ColumnDescriptor]) -> LoadResult<()> {
    if table.trim().is_empty() {
        return Err(LoadError::validation("table name is empty"));
    }
    if columns.is_empty() {
        return Err(LoadError::validation(format!(
            "table '{table}' has no columns"
        )));
    }
    if let Some(c) = columns.iter().find(|c| c.name.trim().is_empty()) {
        return Err(LoadError::validation(format!(
            "table '{table}' has an empty column name (type {})",
            c.inferred_type
        )));
    }
    Ok(())
}
