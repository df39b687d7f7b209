//! Table schema: column type inference and DDL.
//!
//! - [`infer`]: derives [`crate::types::ColumnDescriptor`]s from row data
//! - [`ddl`]: maps descriptors to destination types and renders guarded create/drop statements

pub mod ddl;
pub mod infer;

pub use ddl::{create_table_sql, drop_table_sql, quote_ident, quote_table, sql_type, MAX_FIXED_LENGTH};
pub use infer::{apply_type_overrides, infer_columns, parse_type_name};
