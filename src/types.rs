//! Core data model types.
//!
//! Sources produce a [`RowSet`]: an ordered header of [`SourceColumn`]s plus row-major cells, where
//! every cell is its lexical text or `None` for null. Type inference turns the row set into a list
//! of [`ColumnDescriptor`]s that drive both the DDL and the per-batch insert statement.

use std::fmt;
use std::ops::Range;

/// A single row: one cell per column, in header order. `None` is a null cell.
pub type Row = Vec<Option<String>>;

/// How the source natively represented a column before it was flattened to text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnKind {
    /// Plain text (or anything the source did not tag more precisely).
    #[default]
    Text,
    /// Native boolean; cells hold the literal text `true` / `false`.
    Boolean,
}

/// A named column in a [`RowSet`] header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    /// Column name as it will appear in the destination table.
    pub name: String,
    /// Native representation reported by the source.
    pub kind: ColumnKind,
}

impl SourceColumn {
    /// Create a text column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
        }
    }

    /// Create a column tagged as a native boolean.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Boolean,
        }
    }
}

/// Fully materialized tabular input for one table load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSet {
    /// Ordered header.
    pub columns: Vec<SourceColumn>,
    /// Row-major cells, each row in header order.
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Create a row set from a header and rows.
    pub fn new(columns: Vec<SourceColumn>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterate column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Borrow the contiguous batch `rows[range]`.
    ///
    /// The range is clamped to the row count, so asking past the end yields a short (or empty)
    /// batch rather than panicking.
    pub fn batch(&self, range: Range<usize>) -> &[Row] {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        &self.rows[start..end]
    }
}

/// Destination-facing type chosen for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    /// Every non-null value parses as a 64-bit integer.
    Integer,
    /// Every non-null value parses as a finite float.
    Float,
    /// Every non-null value parses as a date or date-time.
    DateTime,
    /// Calendar date without a time part. Only chosen through an explicit override.
    Date,
    /// Fixed-point number, `NUMERIC(18,4)`. Only chosen through an explicit override.
    Decimal,
    /// Free text.
    String,
    /// Native boolean stored as text (`"true"`/`"false"`).
    Boolean,
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::DateTime => "DATETIME",
            Self::Date => "DATE",
            Self::Decimal => "DECIMAL",
            Self::String => "STRING",
            Self::Boolean => "BOOLEAN",
        };
        f.write_str(s)
    }
}

/// Width used for boolean columns stored as text.
pub const BOOLEAN_TEXT_LENGTH: usize = 10;

/// Type and size descriptor for one destination column.
///
/// Built once per table by [`crate::schema::infer_columns`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Inferred (or overridden) type.
    pub inferred_type: InferredType,
    /// Longest observed value in UTF-16 code units, floored at 1. Tracked for every type.
    pub max_length: usize,
    /// Whether any null was observed.
    pub nullable: bool,
}

impl ColumnDescriptor {
    /// Width of the text column backing this descriptor, for the string-like types.
    ///
    /// Boolean columns are always [`BOOLEAN_TEXT_LENGTH`] wide.
    pub fn text_length(&self) -> Option<usize> {
        match self.inferred_type {
            InferredType::String => Some(self.max_length.max(1)),
            InferredType::Boolean => Some(BOOLEAN_TEXT_LENGTH),
            _ => None,
        }
    }
}
