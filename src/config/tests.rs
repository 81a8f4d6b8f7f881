use std::io::Write;

use super::*;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    file.write_all(contents.as_bytes())
        .expect("write temp config");
    file
}

#[test]
fn defaults_match_client_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.client_config(), ClientConfig::default());
    assert_eq!(settings.cache.default_cache_ttl, Duration::from_secs(300));
    assert_eq!(settings.cache.slow_query_threshold, Duration::from_secs(1));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.default_cache_ttl_ms = Some(60_000);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        cache_ttl_ms: Some(5_000),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.default_cache_ttl, Duration::from_millis(5_000));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.default_cache_ttl_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.default_cache_ttl_ms",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_entries",
            ..
        }
    ));
}

#[test]
fn unparseable_level_names_the_key() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(err.to_string().contains("logging.level"), "{err}");
}

#[test]
fn file_values_are_loaded_and_cli_wins() {
    let file = config_file(
        r#"
[logging]
level = "warn"

[cache]
enable_query_cache = false
default_cache_ttl_ms = 120000
slow_query_threshold_ms = 250
max_entries = 64
"#,
    );

    let overrides = Overrides {
        slow_query_threshold_ms: Some(500),
        ..Default::default()
    };
    let settings = load_from(Some(file.path()), &overrides).expect("settings load");

    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert!(!settings.cache.enable_query_cache);
    assert!(settings.cache.enable_performance_monitoring);
    assert_eq!(settings.cache.default_cache_ttl, Duration::from_secs(120));
    assert_eq!(settings.cache.slow_query_threshold, Duration::from_millis(500));
    assert_eq!(settings.cache.max_entries.get(), 64);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");

    let err = load_from(Some(&missing), &Overrides::default()).expect_err("missing file");
    assert!(matches!(err, LoadError::Build(_)));
}

#[test]
fn default_command_is_none() {
    let args = CliArgs::parse_from(["veneer"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_demo_arguments() {
    let args = CliArgs::parse_from([
        "veneer",
        "demo",
        "--reads",
        "5",
        "--latency-ms",
        "20",
        "--cache-ttl-ms",
        "1000",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("demo command") {
        Command::Demo(demo) => {
            assert_eq!(demo.reads, 5);
            assert_eq!(demo.latency_ms, 20);
            assert_eq!(demo.overrides.cache_ttl_ms, Some(1000));
            assert_eq!(demo.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_config_arguments() {
    let args = CliArgs::parse_from([
        "veneer",
        "--config-file",
        "/etc/veneer.toml",
        "config",
        "--performance-monitoring",
        "off",
    ]);

    assert_eq!(
        args.config_file.as_deref(),
        Some(std::path::Path::new("/etc/veneer.toml"))
    );
    match args.command.expect("config command") {
        Command::Config(config) => {
            assert_eq!(config.overrides.performance_monitoring, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}
