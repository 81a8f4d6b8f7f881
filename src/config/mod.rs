//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::ClientConfig;

mod cli;

pub use cli::{CliArgs, Command, ConfigArgs, DemoArgs, Overrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "veneer";
const ENV_PREFIX: &str = "VENEER";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enable_query_cache: bool,
    pub enable_performance_monitoring: bool,
    pub default_cache_ttl: Duration,
    pub slow_query_threshold: Duration,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let defaults = Overrides::default();
    let overrides = match cli.command.as_ref() {
        Some(Command::Config(args)) => &args.overrides,
        Some(Command::Demo(args)) => &args.overrides,
        None => &defaults,
    };
    load_from(cli.config_file.as_deref(), overrides)
}

fn load_from(config_file: Option<&Path>, overrides: &Overrides) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enable_query_cache = Some(enabled);
        }
        if let Some(enabled) = overrides.performance_monitoring {
            self.cache.enable_performance_monitoring = Some(enabled);
        }
        if let Some(ttl) = overrides.cache_ttl_ms {
            self.cache.default_cache_ttl_ms = Some(ttl);
        }
        if let Some(threshold) = overrides.slow_query_threshold_ms {
            self.cache.slow_query_threshold_ms = Some(threshold);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::from(&self.cache)
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = ClientConfig::default();

    let ttl_ms = cache
        .default_cache_ttl_ms
        .unwrap_or(defaults.default_cache_ttl_ms);
    if ttl_ms == 0 {
        return Err(LoadError::invalid(
            "cache.default_cache_ttl_ms",
            "must be greater than zero",
        ));
    }

    let threshold_ms = cache
        .slow_query_threshold_ms
        .unwrap_or(defaults.slow_query_threshold_ms);

    let max_entries = cache.max_entries.unwrap_or(defaults.max_entries);
    let max_entries = NonZeroUsize::new(max_entries)
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    Ok(CacheSettings {
        enable_query_cache: cache
            .enable_query_cache
            .unwrap_or(defaults.enable_query_cache),
        enable_performance_monitoring: cache
            .enable_performance_monitoring
            .unwrap_or(defaults.enable_performance_monitoring),
        default_cache_ttl: Duration::from_millis(ttl_ms),
        slow_query_threshold: Duration::from_millis(threshold_ms),
        max_entries,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_query_cache: Option<bool>,
    enable_performance_monitoring: Option<bool>,
    default_cache_ttl_ms: Option<u64>,
    slow_query_threshold_ms: Option<u64>,
    max_entries: Option<usize>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
