use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use rust_bulk_loader::config::LoaderConfig;
use rust_bulk_loader::destination::ScriptDestination;
use rust_bulk_loader::ingestion::read_source;
use rust_bulk_loader::load::{
    load_table, load_tables_parallel, CompositeObserver, FileObserver, LoadMetrics, LoadObserver, LoadSummary,
    TableJob, TracingObserver,
};
use rust_bulk_loader::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "bulkload", about = "CSV/JSON -> SQL Server OPENJSON batch loader")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Only load these tables (by configured name).
    #[arg(long, num_args = 1..)]
    tables: Vec<String>,

    /// Log level or filter directive (overrides RUST_LOG and the config's loglevel).
    #[arg(long)]
    log_level: Option<String>,

    /// Write one `<table>.sql` script per table into this directory (tables run in parallel).
    /// Without it, every table is written to stdout in config order.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Compress batch payloads (overrides config).
    #[arg(long)]
    compress: bool,

    /// Append load events to this file.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let default_config = LoaderConfig::default();
        let toml_str = toml::to_string_pretty(&default_config)
            .unwrap_or_else(|e| format!("# failed to serialize default config: {e}"));
        println!("{toml_str}");
        return Ok(());
    }

    let mut config = LoaderConfig::from_path(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;
    init_tracing(cli.log_level.as_deref(), config.options.loglevel.as_deref());
    if cli.compress {
        config.options.compress = true;
    }

    let tables = config.select_tables(&cli.tables);
    if tables.is_empty() {
        tracing::warn!("no tables to load");
        return Ok(());
    }

    let metrics = Arc::new(LoadMetrics::new());
    let mut observers: Vec<Arc<dyn LoadObserver>> = Vec::new();
    observers.push(Arc::new(TracingObserver));
    observers.push(metrics.clone());
    if let Some(path) = &cli.events {
        observers.push(Arc::new(FileObserver::new(path)));
    }
    let observer: Arc<dyn LoadObserver> = Arc::new(CompositeObserver::new(observers));

    let mut jobs = Vec::with_capacity(tables.len());
    for t in tables {
        let rows = read_source(&t.source_path, &t.source_options()?)
            .with_context(|| format!("reading source for table '{}'", t.name))?;
        if rows.row_count() == 0 {
            tracing::warn!(table = %t.name, "source has 0 rows");
        }
        jobs.push(TableJob {
            table: t.name.clone(),
            rows,
            options: t.load_options(&config.options, Some(observer.clone())),
        });
    }

    let mut results = Vec::with_capacity(jobs.len());
    match &cli.out_dir {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let outcomes = load_tables_parallel(jobs, config.options.max_parallel_tables, |table| {
                let file = File::create(dir.join(script_file_name(table)))?;
                Ok(ScriptDestination::new(BufWriter::new(file)))
            })?;
            results.extend(outcomes.into_iter().map(|o| (o.table, o.result)));
        }
        None => {
            let stdout = io::stdout();
            let mut dest = ScriptDestination::new(stdout.lock());
            for job in &jobs {
                let result = load_table(&mut dest, &job.table, &job.rows, &job.options);
                results.push((job.table.clone(), result));
            }
        }
    }

    let mut failed = 0usize;
    for (table, result) in &results {
        match result {
            Ok(summary) => report_summary(summary),
            Err(e) => {
                failed += 1;
                tracing::error!(table = %table, error = %e, "table load failed");
            }
        }
    }
    tracing::info!(metrics = %metrics.snapshot(), "run complete");

    if failed > 0 {
        bail!("{failed} of {} table load(s) failed", results.len());
    }
    Ok(())
}

fn report_summary(summary: &LoadSummary) {
    if summary.skipped_rows.is_empty() {
        tracing::info!("{summary}");
        return;
    }
    tracing::warn!(skipped = summary.skipped_rows.len(), "{summary}");
    for row in &summary.skipped_rows {
        tracing::warn!(table = %summary.table, row = row.index, error = %row.message, "row not loaded");
    }
}

/// `dbo.Orders 2024` -> `dbo.Orders_2024.sql`
fn script_file_name(table: &str) -> String {
    let stem: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}.sql")
}
