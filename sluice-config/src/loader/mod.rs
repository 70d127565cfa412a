pub mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sluice_core::config::TriggerConfig;
use tracing::debug;

use crate::models::{ConfigSource, SluiceConfig};
use crate::validation::{self, ConfigWarnings};
use error::ConfigLoadError;

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "sluice.toml",
    "sluice.json",
    "config/sluice.toml",
    "config/sluice.json",
];

/// A validated configuration plus where it came from and anything the guard
/// rails want the operator to know.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: SluiceConfig,
    pub source: ConfigSource,
    pub warnings: ConfigWarnings,
    pub env_file_loaded: bool,
}

/// Environment variables the loader understands.
///
/// `SLUICE_CONFIG_PATH` and `SLUICE_CONFIG_JSON` pick the base configuration;
/// the rest override single fields on top of it.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub destination_dir: Option<PathBuf>,
    pub pattern: Option<String>,
    pub concurrency: Option<String>,
    /// Human-readable interval such as `30s` or `5m`.
    pub poll_interval: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            config_path: get("SLUICE_CONFIG_PATH").map(PathBuf::from),
            config_json: get("SLUICE_CONFIG_JSON"),
            source_dir: get("SLUICE_SOURCE_DIR").map(PathBuf::from),
            destination_dir: get("SLUICE_DESTINATION_DIR").map(PathBuf::from),
            pattern: get("SLUICE_PATTERN"),
            concurrency: get("SLUICE_CONCURRENCY"),
            poll_interval: get("SLUICE_POLL_INTERVAL"),
        }
    }

    fn apply(&self, config: &mut SluiceConfig) -> Result<(), ConfigLoadError> {
        if let Some(dir) = &self.source_dir {
            config.source.directory = dir.clone();
        }
        if let Some(dir) = &self.destination_dir {
            config.sink.destination = dir.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.source.pattern = Some(pattern.clone());
        }
        if let Some(raw) = &self.concurrency {
            config.poller.concurrency =
                raw.trim()
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigLoadError::InvalidEnv {
                        var: "SLUICE_CONCURRENCY",
                        reason: err.to_string(),
                    })?;
        }
        if let Some(raw) = &self.poll_interval {
            let interval = parse_interval(raw).map_err(|reason| ConfigLoadError::InvalidEnv {
                var: "SLUICE_POLL_INTERVAL",
                reason,
            })?;
            config.poller.trigger = with_period(config.poller.trigger, interval);
        }
        Ok(())
    }
}

/// Parses `30s`, `1m 30s`, `250ms` and friends.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw.trim()).map_err(|err| err.to_string())
}

/// Keeps the trigger's kind and initial delay, replaces its period. One-shot
/// triggers become fixed-delay.
fn with_period(trigger: TriggerConfig, period: Duration) -> TriggerConfig {
    let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
    match trigger {
        TriggerConfig::FixedRate {
            initial_delay_ms, ..
        } => TriggerConfig::FixedRate {
            period_ms,
            initial_delay_ms,
        },
        TriggerConfig::FixedDelay {
            initial_delay_ms, ..
        } => TriggerConfig::FixedDelay {
            delay_ms: period_ms,
            initial_delay_ms,
        },
        TriggerConfig::Once { delay_ms } => TriggerConfig::FixedDelay {
            delay_ms: period_ms,
            initial_delay_ms: delay_ms,
        },
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Use these variables instead of the process environment. `.env` files
    /// are not read when set.
    pub env: Option<EnvConfig>,
    /// Directory default config files are looked up in. Defaults to the
    /// working directory.
    pub search_root: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn with_search_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.options.search_root = Some(root.into());
        self
    }

    /// Resolution order: explicit path, `$SLUICE_CONFIG_PATH`,
    /// `$SLUICE_CONFIG_JSON`, the first default file that exists, built-in
    /// defaults. Field overrides from the environment are applied on top, then
    /// the guard rails run.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env, env_file_loaded) = match &self.options.env {
            Some(env) => (env.clone(), false),
            None => {
                let loaded = self.load_env_file()?;
                (EnvConfig::gather(), loaded)
            }
        };

        let (mut config, source) = self.load_base(&env)?;
        env.apply(&mut config)?;
        let warnings = validation::apply_guard_rails(&config)?;
        debug!(target: "sluice::config", source = ?source, "configuration loaded");

        Ok(ConfigLoad {
            config,
            source,
            warnings,
            env_file_loaded,
        })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        loaded.or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            other => Err(ConfigLoadError::EnvFile(other)),
        })
    }

    fn load_base(&self, env: &EnvConfig) -> Result<(SluiceConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.options.config_path {
            let config = read_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.clone())));
        }

        if let Some(path) = &env.config_path {
            let config = read_file(path)?;
            return Ok((config, ConfigSource::EnvPath(path.clone())));
        }

        if let Some(raw) = &env.config_json {
            let config = SluiceConfig::parse_json(raw).map_err(ConfigLoadError::Inline)?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = read_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((SluiceConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        let root = self
            .options
            .search_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(|candidate| root.join(candidate))
            .find(|path| path.exists())
    }
}

fn read_file(path: &Path) -> Result<SluiceConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    SluiceConfig::load_from_file(path).map_err(|source| ConfigLoadError::File {
        path: path.to_path_buf(),
        source,
    })
}
