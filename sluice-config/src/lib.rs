//! Configuration for Sluice pollers.
//!
//! Loads a [`SluiceConfig`] from an explicit path, the `SLUICE_CONFIG_PATH` /
//! `SLUICE_CONFIG_JSON` environment variables, or a default file, applies
//! per-field environment overrides and runs guard rails that reject
//! impossible settings and warn about questionable ones.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, EnvConfig, error::ConfigLoadError};
pub use models::{ConfigSource, SinkConfig, SluiceConfig, SourceConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
