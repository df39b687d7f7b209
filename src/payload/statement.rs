//! `INSERT ... SELECT ... FROM OPENJSON(...) WITH (...)` rendering.

use crate::error::LoadResult;
use crate::schema::ddl::{escape_literal, quote_ident, sql_type};
use crate::types::ColumnDescriptor;

pub(crate) const B64_VAR: &str = "@payload_b64";
pub(crate) const BIN_VAR: &str = "@payload_bin";
pub(crate) const JSON_VAR: &str = "@payload_json";

/// Parts of the insert that depend only on the table, computed once per load.
#[derive(Debug, Clone)]
pub(crate) struct InsertTemplate {
    head: String,
    with_clause: String,
}

impl InsertTemplate {
    pub(crate) fn new(quoted_table: &str, columns: &[ColumnDescriptor]) -> LoadResult<Self> {
        let column_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut with_lines = Vec::with_capacity(columns.len());
        for c in columns {
            with_lines.push(format!(
                "    {} {} '{}'",
                quote_ident(&c.name),
                sql_type(c),
                escape_literal(&json_path(&c.name)?)
            ));
        }

        Ok(Self {
            // TABLOCK takes one bulk-update lock for the statement instead of row locks.
            head: format!(
                "INSERT INTO {quoted_table} WITH (TABLOCK) ({column_list})\nSELECT {column_list}\n"
            ),
            with_clause: format!("WITH (\n{}\n);", with_lines.join(",\n")),
        })
    }

    /// Payload embedded inline as an `N'...'` literal.
    ///
    /// OPENJSON cannot read from a bound parameter, so the text has to be part of the statement.
    pub(crate) fn render_plain(&self, json: &str) -> String {
        let literal = escape_literal(json);
        let mut sql =
            String::with_capacity(self.head.len() + self.with_clause.len() + literal.len() + 32);
        sql.push_str(&self.head);
        sql.push_str("FROM OPENJSON(N'");
        sql.push_str(&literal);
        sql.push_str("')\n");
        sql.push_str(&self.with_clause);
        sql
    }

    /// Payload carried as base64 of gzip'd UTF-16, unpacked into a variable before the insert.
    pub(crate) fn render_compressed(&self, base64: &str) -> String {
        let mut sql = String::with_capacity(
            self.head.len() + self.with_clause.len() + base64.len() + 384,
        );
        sql.push_str(&format!(
            "DECLARE {B64_VAR} VARCHAR(MAX) = '{}';\n",
            escape_literal(base64)
        ));
        sql.push_str(&format!(
            "DECLARE {BIN_VAR} VARBINARY(MAX) = CAST(N'' AS XML).value('xs:base64Binary(sql:variable(\"{B64_VAR}\"))', 'VARBINARY(MAX)');\n"
        ));
        sql.push_str(&format!(
            "DECLARE {JSON_VAR} NVARCHAR(MAX) = CAST(DECOMPRESS({BIN_VAR}) AS NVARCHAR(MAX));\n"
        ));
        sql.push_str(&self.head);
        sql.push_str(&format!("FROM OPENJSON({JSON_VAR})\n"));
        sql.push_str(&self.with_clause);
        sql
    }
}

/// JSON path selecting the key `name`, quoted so spaces and punctuation survive: `$."first name"`.
pub(crate) fn json_path(name: &str) -> LoadResult<String> {
    Ok(format!("$.{}", serde_json::to_string(name)?))
}

#[cfg(test)]
mod tests {
    use super::{json_path, InsertTemplate};
    use crate::types::{ColumnDescriptor, InferredType};

    fn cols() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor {
                name: "id".to_string(),
                inferred_type: InferredType::Integer,
                max_length: 3,
                nullable: false,
            },
            ColumnDescriptor {
                name: "first name".to_string(),
                inferred_type: InferredType::String,
                max_length: 20,
                nullable: true,
            },
        ]
    }

    #[test]
    fn json_paths_quote_keys() {
        assert_eq!(json_path("id").unwrap(), r#"$."id""#);
        assert_eq!(json_path("a\"b").unwrap(), r#"$."a\"b""#);
    }

    #[test]
    fn plain_statement_shape() {
        let t = InsertTemplate::new("[dbo].[people]", &cols()).unwrap();
        let sql = t.render_plain(r#"[{"id":"1","first name":"O'Hara"}]"#);
        assert!(sql.starts_with(
            "INSERT INTO [dbo].[people] WITH (TABLOCK) ([id], [first name])\nSELECT [id], [first name]\n"
        ));
        assert!(sql.contains(r#"FROM OPENJSON(N'[{"id":"1","first name":"O''Hara"}]')"#));
        assert!(sql.contains(r#"    [id] BIGINT '$."id"',"#));
        assert!(sql.contains(r#"    [first name] NVARCHAR(20) '$."first name"'"#));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn compressed_statement_has_three_step_preamble() {
        let t = InsertTemplate::new("[t]", &cols()).unwrap();
        let sql = t.render_compressed("H4sIAAAA");
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(lines[0], "DECLARE @payload_b64 VARCHAR(MAX) = 'H4sIAAAA';");
        assert!(lines[1].starts_with("DECLARE @payload_bin VARBINARY(MAX) = CAST(N'' AS XML)"));
        assert_eq!(
            lines[2],
            "DECLARE @payload_json NVARCHAR(MAX) = CAST(DECOMPRESS(@payload_bin) AS NVARCHAR(MAX));"
        );
        assert!(sql.contains("FROM OPENJSON(@payload_json)\n"));
    }
}
