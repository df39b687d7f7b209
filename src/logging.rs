//! Tracing subscriber setup for the `bulkload` binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when nothing else is configured.
pub const DEFAULT_FILTER: &str = "info";

/// Pick the filter directive. Precedence: command-line flag, then `RUST_LOG`, then the config
/// file's `loglevel`, then [`DEFAULT_FILTER`].
pub fn resolve_filter(cli: Option<&str>, env: Option<&str>, config: Option<&str>) -> String {
    let non_empty = |s: &&str| !s.trim().is_empty();
    if let Some(level) = cli.filter(non_empty) {
        return normalize_level(level);
    }
    if let Some(directive) = env.filter(non_empty) {
        return directive.to_string();
    }
    config
        .filter(non_empty)
        .map(normalize_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Map level names as users tend to write them (`WARNING`, `CRITICAL`, ...) to tracing levels.
/// Anything unrecognized passes through as a filter directive.
pub fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" | "warn" => "warn".to_string(),
        "critical" | "fatal" | "error" => "error".to_string(),
        "info" => "info".to_string(),
        "debug" => "debug".to_string(),
        "trace" => "trace".to_string(),
        _ => level.trim().to_string(),
    }
}

/// Install the global fmt subscriber. A second call is a no-op.
pub fn init_tracing(cli_level: Option<&str>, config_level: Option<&str>) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = resolve_filter(cli_level, env.as_deref(), config_level);
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
