use crate::error::{CitysimError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a configuration value came from, ordered by precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigSource {
    Default,
    /// TOML file named by `CITYSIM_CONFIG`
    File,
    /// `CITYSIM_*` environment variables
    Environment,
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Replace the value unless it came from a source of equal or higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source > self.source {
            self.value = value;
            self.source = source;
        }
    }
}

/// Layered configuration for the execution engine
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// Directory holding cached JSON/raster artifacts
    pub cache_dir: ConfigValue<PathBuf>,
    /// Seconds between two cache prune sweeps
    pub cache_interval_secs: ConfigValue<u64>,
    /// Seconds of idleness after which a cached artifact is evicted
    pub cache_expiry_secs: ConfigValue<u64>,
    /// Upper bound of analysis runs executing at the same time
    pub max_concurrent_runs: ConfigValue<usize>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        Self {
            cache_dir: ConfigValue::new(PathBuf::from("./cache"), ConfigSource::Default),
            cache_interval_secs: ConfigValue::new(60, ConfigSource::Default),
            cache_expiry_secs: ConfigValue::new(3600, ConfigSource::Default),
            max_concurrent_runs: ConfigValue::new(8, ConfigSource::Default),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| CitysimError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| CitysimError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        if let Some(cache_dir) = file_config.cache_dir {
            self.cache_dir.update(cache_dir, ConfigSource::File);
        }

        if let Some(interval) = file_config.cache_interval_secs {
            self.cache_interval_secs.update(interval, ConfigSource::File);
        }

        if let Some(expiry) = file_config.cache_expiry_secs {
            self.cache_expiry_secs.update(expiry, ConfigSource::File);
        }

        if let Some(max_runs) = file_config.max_concurrent_runs {
            self.max_concurrent_runs.update(max_runs, ConfigSource::File);
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        // CITYSIM_CACHE_DIR
        if let Ok(dir) = env::var("CITYSIM_CACHE_DIR") {
            if dir.trim().is_empty() {
                tracing::warn!("Ignoring empty CITYSIM_CACHE_DIR");
            } else {
                self.cache_dir.update(PathBuf::from(dir), ConfigSource::Environment);
            }
        }

        // CITYSIM_CACHE_INTERVAL_SECS
        if let Some(interval) = parse_positive_env::<u64>("CITYSIM_CACHE_INTERVAL_SECS") {
            self.cache_interval_secs.update(interval, ConfigSource::Environment);
        }

        // CITYSIM_CACHE_EXPIRY_SECS
        if let Some(expiry) = parse_positive_env::<u64>("CITYSIM_CACHE_EXPIRY_SECS") {
            self.cache_expiry_secs.update(expiry, ConfigSource::Environment);
        }

        // CITYSIM_MAX_CONCURRENT_RUNS
        if let Some(max_runs) = parse_positive_env::<usize>("CITYSIM_MAX_CONCURRENT_RUNS") {
            self.max_concurrent_runs.update(max_runs, ConfigSource::Environment);
        }

        self
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.cache_interval_secs.value == 0 {
            return Err(CitysimError::ConfigInvalid {
                key: "cache_interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_concurrent_runs.value == 0 {
            return Err(CitysimError::ConfigInvalid {
                key: "max_concurrent_runs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn cache_interval(&self) -> Duration {
        Duration::from_secs(self.cache_interval_secs.value)
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expiry_secs.value)
    }

    /// Every value rendered as text together with its source
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        [
            ("cache_dir", self.cache_dir.value.display().to_string(), self.cache_dir.source),
            (
                "cache_interval_secs",
                self.cache_interval_secs.value.to_string(),
                self.cache_interval_secs.source,
            ),
            (
                "cache_expiry_secs",
                self.cache_expiry_secs.value.to_string(),
                self.cache_expiry_secs.source,
            ),
            (
                "max_concurrent_runs",
                self.max_concurrent_runs.value.to_string(),
                self.max_concurrent_runs.source,
            ),
        ]
        .into_iter()
        .map(|(key, value, source)| (key.to_string(), (value, source)))
        .collect()
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
struct FileConfig {
    cache_dir: Option<PathBuf>,
    cache_interval_secs: Option<u64>,
    cache_expiry_secs: Option<u64>,
    max_concurrent_runs: Option<usize>,
}

fn parse_positive_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!("Invalid {} value '{}': expected a positive integer", key, raw);
            None
        }
    }
}
