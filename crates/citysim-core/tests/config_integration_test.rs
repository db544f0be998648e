//! Integration tests for layered configuration
//!
//! These tests verify that configuration loading follows the correct precedence:
//! Environment variables > Config file > Defaults

use citysim_core::config::{ConfigSource, LayeredConfig};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const ENV_KEYS: [&str; 4] = [
    "CITYSIM_CACHE_DIR",
    "CITYSIM_CACHE_INTERVAL_SECS",
    "CITYSIM_CACHE_EXPIRY_SECS",
    "CITYSIM_MAX_CONCURRENT_RUNS",
];

fn clear_env() {
    for key in ENV_KEYS {
        env::remove_var(key);
    }
}

#[test]
fn test_partial_file_configuration() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
cache_expiry_secs = 600
# Only override expiry, leave others as defaults
"#
    )
    .unwrap();

    let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

    assert_eq!(config.cache_expiry_secs.value, 600);
    assert_eq!(config.cache_expiry_secs.source, ConfigSource::File);
    // These should still be defaults
    assert_eq!(config.cache_interval_secs.value, 60);
    assert_eq!(config.cache_interval_secs.source, ConfigSource::Default);
    assert_eq!(config.cache_dir.source, ConfigSource::Default);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();

    env::set_var("CITYSIM_CACHE_DIR", "/tmp/citysim-env-cache");
    env::set_var("CITYSIM_MAX_CONCURRENT_RUNS", "3");

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
cache_dir = "/tmp/citysim-file-cache"
max_concurrent_runs = 16
cache_interval_secs = 10
"#
    )
    .unwrap();

    let config = LayeredConfig::with_defaults()
        .load_from_file(file.path())
        .unwrap()
        .load_from_env();

    // Environment should override file
    assert_eq!(config.cache_dir.value, PathBuf::from("/tmp/citysim-env-cache"));
    assert_eq!(config.cache_dir.source, ConfigSource::Environment);
    assert_eq!(config.max_concurrent_runs.value, 3);
    assert_eq!(config.max_concurrent_runs.source, ConfigSource::Environment);
    // File value untouched by environment
    assert_eq!(config.cache_interval_secs.value, 10);
    assert_eq!(config.cache_interval_secs.source, ConfigSource::File);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_environment_values_are_ignored() {
    clear_env();

    env::set_var("CITYSIM_CACHE_INTERVAL_SECS", "soon");
    env::set_var("CITYSIM_MAX_CONCURRENT_RUNS", "0");
    env::set_var("CITYSIM_CACHE_DIR", "   ");

    let config = LayeredConfig::with_defaults().load_from_env();

    assert_eq!(config.cache_interval_secs.value, 60);
    assert_eq!(config.cache_interval_secs.source, ConfigSource::Default);
    assert_eq!(config.max_concurrent_runs.value, 8);
    assert_eq!(config.cache_dir.source, ConfigSource::Default);

    clear_env();
}

#[test]
fn test_invalid_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "cache_dir = [not valid").unwrap();

    let result = LayeredConfig::with_defaults().load_from_file(file.path());
    assert!(result.is_err());
}

#[test]
fn test_missing_config_file() {
    let result = LayeredConfig::with_defaults().load_from_file("/nonexistent/citysim.toml");
    assert!(result.is_err());
}
