// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs;
use std::time::Duration;

use crate::config::{load_and_validate_config, load_config, RuntimeBuilder};
use crate::errors::ConfigError;

#[test]
fn yaml_config_builds_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runwood.yaml");
    fs::write(
        &path,
        r#"
executor:
  max_concurrency: 2
concurrency:
  limits:
    foo: 10
    bar: 1
daemons:
  required: [SCHEDULER]
settings:
  auto_materialize_paused: true
"#,
    )
    .unwrap();

    let config = load_and_validate_config(&path).unwrap();
    assert_eq!(config.executor.max_concurrency(), 2);

    let instance = RuntimeBuilder::from_config(&config).unwrap();
    let reporter = instance.reporter();
    let keys: Vec<String> = reporter.concurrency_limits().into_iter().map(|l| l.key).collect();
    assert_eq!(keys, vec!["bar", "foo"]);
    assert!(reporter.auto_materialize_paused());

    let scheduler = reporter.daemon_status("SCHEDULER").unwrap();
    assert!(scheduler.required);
    assert!(!scheduler.healthy);
}

#[test]
fn toml_config_is_chosen_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runwood.toml");
    fs::write(
        &path,
        r#"
[retry]
max_retries = 3

[retry.backoff]
first_ms = 50
max_ms = 400
factor = 2.0

[daemons]
heartbeat_tolerance_seconds = 30
"#,
    )
    .unwrap();

    let config = load_and_validate_config(&path).unwrap();
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.policy().backoff.delay_for(2), Duration::from_millis(200));
    assert_eq!(config.daemons.heartbeat_tolerance(), Duration::from_secs(30));
}

#[test]
fn persisted_limits_are_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger.json");
    let config_path = dir.path().join("runwood.yaml");
    fs::write(
        &config_path,
        format!(
            "concurrency:\n  storage_path: {}\n  limits:\n    foo: 4\n",
            ledger_path.display()
        ),
    )
    .unwrap();

    let config = load_and_validate_config(&config_path).unwrap();
    {
        let instance = RuntimeBuilder::from_config(&config).unwrap();
        instance.set_concurrency_limit("baz", 7).unwrap();
    }

    let instance = RuntimeBuilder::from_config(&config).unwrap();
    let reporter = instance.reporter();
    assert_eq!(reporter.concurrency_limit("foo").limit, 4);
    assert_eq!(reporter.concurrency_limit("baz").limit, 7);
}

#[test]
fn invalid_values_are_all_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(
        &path,
        "executor:\n  max_concurrency: 0\nconcurrency:\n  limits:\n    foo: -2\n",
    )
    .unwrap();

    match load_and_validate_config(&path) {
        Err(ConfigError::Invalid(errors)) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[1].contains("concurrency.limits.foo"));
        }
        other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_file_and_bad_syntax_are_distinguished() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_config(dir.path().join("absent.yaml")),
        Err(ConfigError::Io { .. })
    ));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[retry\nmax_retries = ").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
}
