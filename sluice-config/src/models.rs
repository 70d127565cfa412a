use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use sluice_core::config::PollerConfig;

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    /// Path handed to the loader directly, e.g. `--config`.
    Explicit(PathBuf),
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Everything one `sluicectl` poller needs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SluiceConfig {
    /// Poll cadence, batch sizes, worker count and backlog limits.
    pub poller: PollerConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
}

/// The directory being watched and which of its entries count.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub directory: PathBuf,
    /// Regular expression file names must match. Unset accepts every file.
    pub pattern: Option<String>,
    /// Skip dot-files and in-progress transfers.
    pub ignore_hidden: bool,
    /// Suffixes marking a transfer still in progress. Unset uses the
    /// built-in list: `.INCOMPLETE`, `.part` and `.tmp`.
    pub incomplete_suffixes: Option<Vec<String>>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("inbox"),
            pattern: None,
            ignore_hidden: true,
            incomplete_suffixes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Where processed files are mirrored.
    pub destination: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("archive"),
        }
    }
}

impl SluiceConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sluice config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid sluice config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid sluice config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse sluice config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid sluice config json: {err}"))
    }
}
