use std::collections::HashMap;
use std::fs;

use sluice_config::{ConfigLoadError, ConfigLoader, ConfigSource, EnvConfig};
use sluice_core::config::{OverlapPolicy, TriggerConfig};
use tempfile::TempDir;

fn env(vars: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(move |key| vars.get(key).cloned())
}

#[test]
fn falls_back_to_defaults() {
    let root = TempDir::new().expect("tempdir");
    let load = ConfigLoader::new()
        .with_env(env(&[]))
        .with_search_root(root.path())
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::Default);
    assert_eq!(load.config.poller.concurrency, 1);
    assert!(load.warnings.is_empty());
}

#[test]
fn default_file_is_discovered() {
    let root = TempDir::new().expect("tempdir");
    fs::create_dir(root.path().join("config")).expect("mkdir");
    fs::write(
        root.path().join("config/sluice.toml"),
        "[source]\ndirectory = \"/srv/in\"\n",
    )
    .expect("write");

    let load = ConfigLoader::new()
        .with_env(env(&[]))
        .with_search_root(root.path())
        .load()
        .expect("load");
    assert_eq!(
        load.source,
        ConfigSource::File(root.path().join("config/sluice.toml"))
    );
    assert_eq!(load.config.source.directory.to_str(), Some("/srv/in"));
}

#[test]
fn env_path_wins_over_inline_json() {
    let root = TempDir::new().expect("tempdir");
    let path = root.path().join("custom.json");
    fs::write(&path, r#"{"poller": {"concurrency": 5, "overlap": "allow"}}"#).expect("write");

    let load = ConfigLoader::new()
        .with_env(env(&[
            ("SLUICE_CONFIG_PATH", path.to_str().expect("utf8 path")),
            ("SLUICE_CONFIG_JSON", r#"{"poller": {"concurrency": 9}}"#),
        ]))
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::EnvPath(path));
    assert_eq!(load.config.poller.concurrency, 5);
    assert_eq!(load.config.poller.overlap, OverlapPolicy::Allow);
}

#[test]
fn inline_json_and_field_overrides() {
    let load = ConfigLoader::new()
        .with_env(env(&[
            ("SLUICE_CONFIG_JSON", r#"{"sink": {"destination": "/srv/out"}}"#),
            ("SLUICE_SOURCE_DIR", "/srv/in"),
            ("SLUICE_POLL_INTERVAL", "45s"),
        ]))
        .load()
        .expect("load");
    assert_eq!(load.source, ConfigSource::EnvInline);
    assert_eq!(load.config.source.directory.to_str(), Some("/srv/in"));
    assert_eq!(load.config.sink.destination.to_str(), Some("/srv/out"));
    assert_eq!(
        load.config.poller.trigger,
        TriggerConfig::FixedDelay {
            delay_ms: 45_000,
            initial_delay_ms: 0
        }
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let err = ConfigLoader::new()
        .with_env(env(&[]))
        .with_config_path("/nope/sluice.toml")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn bad_override_names_the_variable() {
    let err = ConfigLoader::new()
        .with_env(env(&[("SLUICE_CONCURRENCY", "many")]))
        .load()
        .unwrap_err();
    assert!(err.to_string().contains("SLUICE_CONCURRENCY"));
}

#[test]
fn guard_rails_run_after_overrides() {
    let err = ConfigLoader::new()
        .with_env(env(&[("SLUICE_CONCURRENCY", "0")]))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::GuardRail(_)));
}
