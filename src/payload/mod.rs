//! Batch payload construction.
//!
//! A [`PayloadEncoder`] is built once per table and turns each batch of rows into one
//! [`InsertStatement`]: the rows as a JSON array of string-valued objects, optionally compressed,
//! embedded inline in a single `INSERT ... SELECT ... FROM OPENJSON(...)`. The destination runs
//! OPENJSON as one set-based operation, so a statement lands all of its rows or none.
//!
//! ```rust
//! use rust_bulk_loader::payload::PayloadEncoder;
//! use rust_bulk_loader::types::{ColumnDescriptor, InferredType};
//!
//! let columns = vec![ColumnDescriptor {
//!     name: "id".to_string(),
//!     inferred_type: InferredType::Integer,
//!     max_length: 1,
//!     nullable: false,
//! }];
//! let encoder = PayloadEncoder::new("dbo.t", &columns, false).unwrap();
//! let stmt = encoder.encode(&[vec![Some("7".to_string())]]).unwrap();
//! assert_eq!(stmt.rows, 1);
//! assert!(stmt.sql.contains(r#"OPENJSON(N'[{"id":"7"}]')"#));
//! ```

pub mod compress;
pub mod json;
mod statement;

use crate::error::LoadResult;
use crate::schema::ddl::{quote_table, validate};
use crate::types::{ColumnDescriptor, Row};

pub use compress::{compress_json, decompress_json};
pub use json::{decode_rows, encode_rows};

use statement::InsertTemplate;

/// The batch data as carried inside a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// JSON text embedded as an `N'...'` literal.
    Plain(String),
    /// base64 of gzip'd UTF-16LE JSON.
    Compressed(String),
}

impl Payload {
    /// Size of the payload text as embedded in the statement.
    pub fn len(&self) -> usize {
        match self {
            Self::Plain(s) | Self::Compressed(s) => s.len(),
        }
    }

    /// Whether the payload text is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One rendered, self-contained insert for a batch.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    /// Statement text to hand to the destination.
    pub sql: String,
    /// Number of rows carried.
    pub rows: usize,
    /// Length of the uncompressed JSON text.
    pub json_len: usize,
    /// The embedded payload.
    pub payload: Payload,
}

/// Renders per-batch insert statements for one table.
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    column_names: Vec<String>,
    compress: bool,
    template: InsertTemplate,
}

impl PayloadEncoder {
    /// Create an encoder for `table` with the given column descriptors.
    pub fn new(table: &str, columns: &[ColumnDescriptor], compress: bool) -> LoadResult<Self> {
        validate(table, columns)?;
        Ok(Self {
            column_names: columns.iter().map(|c| c.name.clone()).collect(),
            compress,
            template: InsertTemplate::new(&quote_table(table), columns)?,
        })
    }

    /// Whether statements carry compressed payloads.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Column names in payload key order.
    pub fn column_names(&self) -> Vec<&str> {
        self.column_names.iter().map(String::as_str).collect()
    }

    /// Render the insert for `rows`.
    pub fn encode(&self, rows: &[Row]) -> LoadResult<InsertStatement> {
        let json = encode_rows(&self.column_names(), rows)?;
        let json_len = json.len();

        let (sql, payload) = if self.compress {
            let packed = compress_json(&json)?;
            (self.template.render_compressed(&packed), Payload::Compressed(packed))
        } else {
            (self.template.render_plain(&json), Payload::Plain(json))
        };

        Ok(InsertStatement {
            sql,
            rows: rows.len(),
            json_len,
            payload,
        })
    }
}

/// Recover the JSON text of a payload.
pub fn decode_payload(payload: &Payload) -> LoadResult<String> {
    match payload {
        Payload::Plain(json) => Ok(json.clone()),
        Payload::Compressed(packed) => decompress_json(packed),
    }
}
