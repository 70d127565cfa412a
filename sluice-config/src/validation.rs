use regex::Regex;
use sluice_core::config::{OverlapPolicy, TriggerConfig};
use thiserror::Error;

use crate::models::SluiceConfig;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("poller.concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("trigger {field} must be greater than zero")]
    ZeroPeriod { field: &'static str },
    #[error("source.pattern {pattern:?} is not a valid regular expression: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("source.directory must not be empty")]
    MissingSourceDirectory,
    #[error("source.directory and sink.destination both point at {path}")]
    SourceIsDestination { path: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

pub fn apply_guard_rails(config: &SluiceConfig) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let poller = &config.poller;

    if poller.concurrency == 0 {
        return Err(ConfigGuardRailError::ZeroConcurrency);
    }

    match poller.trigger {
        TriggerConfig::FixedRate { period_ms: 0, .. } => {
            return Err(ConfigGuardRailError::ZeroPeriod { field: "period_ms" });
        }
        TriggerConfig::FixedDelay { delay_ms: 0, .. } => {
            return Err(ConfigGuardRailError::ZeroPeriod { field: "delay_ms" });
        }
        _ => {}
    }

    if let Some(pattern) = &config.source.pattern
        && let Err(err) = Regex::new(pattern)
    {
        return Err(ConfigGuardRailError::InvalidPattern {
            pattern: pattern.clone(),
            reason: err.to_string(),
        });
    }

    if config.source.directory.as_os_str().is_empty() {
        return Err(ConfigGuardRailError::MissingSourceDirectory);
    }
    if config.source.directory == config.sink.destination {
        return Err(ConfigGuardRailError::SourceIsDestination {
            path: config.source.directory.display().to_string(),
        });
    }

    if poller.overlap == OverlapPolicy::Allow
        && poller.concurrency > 1
        && poller.backlog.done_capacity.is_some()
    {
        warnings.push_with_hint(
            "overlapping ticks with a bounded done set can re-deliver evicted items",
            "Leave poller.backlog.done_capacity unset or size it above the source listing",
        );
    }

    if poller.overlap == OverlapPolicy::Skip && poller.concurrency > 1 {
        warnings.push_with_hint(
            format!(
                "poller.concurrency = {} has no effect while overlap = \"skip\"",
                poller.concurrency
            ),
            "Set poller.overlap = \"allow\" to let workers tick in parallel",
        );
    }

    if let Some(task_cap) = poller.task_limit().max() {
        let oversized = poller.reserve_limit().max().is_none_or(|reserve| reserve > task_cap);
        if oversized {
            warnings.push_with_hint(
                format!(
                    "poller.max_items_per_poll reserves more than the {task_cap} items each tick delivers; the rest sit in flight and are handed back"
                ),
                format!("Set poller.max_items_per_poll to {task_cap} or less so other workers can take them"),
            );
        }
    }

    if poller.process_timeout_ms == Some(0) {
        warnings.push("poller.process_timeout_ms = 0 fails every batch; unset it to disable the timeout");
    }

    if !config.source.ignore_hidden {
        warnings.push("source.ignore_hidden is false; partially uploaded files may be picked up");
    }

    Ok(warnings)
}
