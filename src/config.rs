//! TOML configuration for multi-table loads.
//!
//! ```toml
//! [options]
//! loglevel = "info"
//! chunksize = 5000
//! compress = true
//!
//! [[tables]]
//! name = "dbo.orders"
//! source_path = "data/orders.csv"
//! source_type = "csv"
//! null_values = ["NA", "NULL"]
//! if_exists = "replace"
//!
//! [tables.column_mappings]
//! "Order ID" = "order_id"
//!
//! [tables.dtypes]
//! order_id = "BIGINT"
//!
//! [[tables]]
//! name = "dbo.targets"
//! source_path = "data/targets.xlsx"
//! source_type = "excel"
//! sheet = "2024"
//! ```
//!
//! Unknown keys (for example a `[database]` section consumed by something else) are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptive::{RetryPolicy, RowFallbackPolicy};
use crate::error::{LoadError, LoadResult};
use crate::ingestion::{SourceFormat, SourceOptions};
use crate::load::{IfExists, LoadObserver, LoadOptions};

/// Whole configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub options: OptionsConfig,
    pub tables: Vec<TableConfig>,
}

/// `[options]`: settings shared by every table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub loglevel: Option<String>,
    /// Starting batch size.
    pub chunksize: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    pub target_seconds: f64,
    pub max_retries: u32,
    /// Hold the batch size near `chunksize` instead of adapting multiplicatively.
    pub fixed_batch: bool,
    pub compress: bool,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub row_fallback: RowFallbackPolicy,
    pub max_parallel_tables: usize,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            loglevel: None,
            chunksize: policy.start_batch,
            min_batch: policy.min_batch,
            max_batch: policy.max_batch,
            target_seconds: policy.target_seconds,
            max_retries: policy.max_retries,
            fixed_batch: policy.fixed_batch,
            compress: false,
            backoff_ms: policy.backoff_base.as_millis() as u64,
            max_backoff_ms: policy.backoff_max.as_millis() as u64,
            row_fallback: policy.row_fallback,
            max_parallel_tables: 1,
        }
    }
}

impl OptionsConfig {
    /// The batching policy these options describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            start_batch: self.chunksize,
            min_batch: self.min_batch,
            max_batch: self.max_batch,
            target_seconds: self.target_seconds,
            max_retries: self.max_retries,
            fixed_batch: self.fixed_batch,
            backoff_base: Duration::from_millis(self.backoff_ms),
            backoff_max: Duration::from_millis(self.max_backoff_ms),
            row_fallback: self.row_fallback,
            ..RetryPolicy::default()
        }
    }
}

/// One `[[tables]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub source_path: PathBuf,
    /// Defaults to the file extension.
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Workbook sheet; the first sheet when unset.
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub null_values: Vec<String>,
    #[serde(default)]
    pub column_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    #[serde(default)]
    pub if_exists: IfExists,
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl TableConfig {
    /// Parsed `source_type`, if set.
    pub fn source_format(&self) -> LoadResult<Option<SourceFormat>> {
        let Some(raw) = self.source_type.as_deref() else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Some(SourceFormat::Csv)),
            "json" | "ndjson" => Ok(Some(SourceFormat::Json)),
            "excel" | "xlsx" => Ok(Some(SourceFormat::Excel)),
            other => Err(LoadError::validation(format!(
                "table '{}': unsupported source_type '{other}' (expected csv, json or excel)",
                self.name
            ))),
        }
    }

    /// Single-byte delimiter; `\t` / `tab` spell a tab.
    pub fn delimiter_byte(&self) -> LoadResult<u8> {
        let d = self.delimiter.as_str();
        match d {
            "\\t" | "tab" => Ok(b'\t'),
            _ if d.len() == 1 => Ok(d.as_bytes()[0]),
            _ => Err(LoadError::validation(format!(
                "table '{}': delimiter must be a single byte (got '{d}')",
                self.name
            ))),
        }
    }

    pub fn source_options(&self) -> LoadResult<SourceOptions> {
        Ok(SourceOptions {
            format: self.source_format()?,
            delimiter: self.delimiter_byte()?,
            null_values: self.null_values.clone(),
            column_mappings: self.column_mappings.clone(),
            sheet: self.sheet.clone(),
        })
    }

    /// Load options for this table, using the shared `[options]`.
    pub fn load_options(
        &self,
        options: &OptionsConfig,
        observer: Option<Arc<dyn LoadObserver>>,
    ) -> LoadOptions {
        LoadOptions {
            policy: options.retry_policy(),
            compress: options.compress,
            if_exists: self.if_exists,
            dtypes: self.dtypes.clone(),
            observer,
        }
    }
}

impl LoaderConfig {
    /// Read and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::validation(format!("config not found: {}", path.display()))
            } else {
                LoadError::Io(e)
            }
        })?;
        let cfg = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), tables = cfg.tables.len(), "read config");
        Ok(cfg)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> LoadResult<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> LoadResult<()> {
        self.options.retry_policy().validate()?;
        if self.options.max_parallel_tables == 0 {
            return Err(LoadError::validation("max_parallel_tables must be > 0"));
        }
        for (idx, t) in self.tables.iter().enumerate() {
            if t.name.trim().is_empty() {
                return Err(LoadError::validation(format!("tables[{idx}]: name is empty")));
            }
            if t.source_path.as_os_str().is_empty() {
                return Err(LoadError::validation(format!(
                    "table '{}': source_path is empty",
                    t.name
                )));
            }
            t.source_format()?;
            t.delimiter_byte()?;
        }
        Ok(())
    }

    /// Tables to run: all of them, or only those named in `only` (in config order).
    pub fn select_tables(&self, only: &[String]) -> Vec<&TableConfig> {
        if only.is_empty() {
            return self.tables.iter().collect();
        }
        let selected: Vec<&TableConfig> = self.tables.iter().filter(|t| only.contains(&t.name)).collect();
        if selected.is_empty() {
            tracing::warn!(filters = ?only, "no configured tables match the filter");
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::LoaderConfig;
    use crate::adaptive::RowFallbackPolicy;
    use crate::ingestion::SourceFormat;
    use crate::load::IfExists;

    const SAMPLE: &str = r#"
[database]
url = "mssql+pyodbc://ignored"

[options]
loglevel = "DEBUG"
chunksize = 2000
max_batch = 20000
compress = true
backoff_ms = 100
row_fallback = "abort_on_first_failure"

[[tables]]
name = "dbo.orders"
source_path = "orders.csv"
source_type = "CSV"
delimiter = ";"
null_values = ["NA"]
if_exists = "skip"

[tables.column_mappings]
"Order ID" = "order_id"

[tables.dtypes]
order_id = "bigint"

[[tables]]
name = "events"
source_path = "events.ndjson"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = LoaderConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.options.loglevel.as_deref(), Some("DEBUG"));
        assert_eq!(cfg.options.min_batch, 1_000);

        let policy = cfg.options.retry_policy();
        assert_eq!(policy.start_batch, 2_000);
        assert_eq!(policy.max_batch, 20_000);
        assert_eq!(policy.backoff_base, Duration::from_millis(100));
        assert_eq!(policy.row_fallback, RowFallbackPolicy::AbortOnFirstFailure);

        let orders = &cfg.tables[0];
        assert_eq!(orders.if_exists, IfExists::Skip);
        let src = orders.source_options().unwrap();
        assert_eq!(src.format, Some(SourceFormat::Csv));
        assert_eq!(src.delimiter, b';');
        assert_eq!(orders.column_mappings["Order ID"], "order_id");

        let events = &cfg.tables[1];
        assert_eq!(events.if_exists, IfExists::Append);
        assert_eq!(events.source_format().unwrap(), None);
        let opts = events.load_options(&cfg.options, None);
        assert!(opts.compress);
    }

    #[test]
    fn excel_tables_carry_their_sheet() {
        let text = "[[tables]]\nname = \"t\"\nsource_path = \"book.xlsx\"\nsource_type = \"Excel\"\nsheet = \"Q1\"\n";
        let cfg = LoaderConfig::from_toml(text).unwrap();
        let src = cfg.tables[0].source_options().unwrap();
        assert_eq!(src.format, Some(SourceFormat::Excel));
        assert_eq!(src.sheet.as_deref(), Some("Q1"));
    }

    #[test]
    fn rejects_bad_values() {
        let bad_type = "[[tables]]\nname = \"t\"\nsource_path = \"a.dat\"\nsource_type = \"parquet\"\n";
        assert!(LoaderConfig::from_toml(bad_type).unwrap_err().to_string().contains("unsupported source_type"));

        let empty_name = "[[tables]]\nname = \" \"\nsource_path = \"a.csv\"\n";
        assert!(LoaderConfig::from_toml(empty_name).is_err());

        let bad_band = "[options]\nmin_batch = 10\nmax_batch = 5\n";
        assert!(LoaderConfig::from_toml(bad_band).is_err());

        let bad_delim = "[[tables]]\nname = \"t\"\nsource_path = \"a.csv\"\ndelimiter = \"::\"\n";
        assert!(LoaderConfig::from_toml(bad_delim).is_err());

        assert!(LoaderConfig::from_toml("tables = 3").is_err());
    }

    #[test]
    fn table_filter_keeps_config_order() {
        let cfg = LoaderConfig::from_toml(SAMPLE).unwrap();
        let names: Vec<&str> = cfg
            .select_tables(&["events".to_string(), "dbo.orders".to_string()])
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["dbo.orders", "events"]);
        assert!(cfg.select_tables(&["missing".to_string()]).is_empty());
        assert_eq!(cfg.select_tables(&[]).len(), 2);
    }
}
