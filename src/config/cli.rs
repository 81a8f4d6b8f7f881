use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the veneer binary.
#[derive(Debug, Parser)]
#[command(
    name = "veneer",
    version,
    about = "Caching and instrumentation layer for a query-builder client"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VENEER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the resolved client configuration as JSON.
    Config(ConfigArgs),
    /// Run reads and a write against the in-process backend and print cache
    /// statistics as JSON.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Number of identical reads issued before the write.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub reads: u32,

    /// Simulated backend latency per call.
    #[arg(long = "latency-ms", default_value_t = 0, value_name = "MS")]
    pub latency_ms: u64,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the read cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Toggle spans, metrics and slow-call warnings.
    #[arg(
        long = "performance-monitoring",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub performance_monitoring: Option<bool>,

    /// Override the cached read lifetime.
    #[arg(long = "cache-ttl-ms", value_name = "MS")]
    pub cache_ttl_ms: Option<u64>,

    /// Override the slow-call threshold.
    #[arg(long = "slow-query-threshold-ms", value_name = "MS")]
    pub slow_query_threshold_ms: Option<u64>,

    /// Override the cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,
}
