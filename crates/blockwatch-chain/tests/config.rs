use std::collections::HashMap;
use std::io::Write;

use blockwatch_chain::config::{apply_overrides, load_config, Config, ConfigError};
use blockwatch_chain::{init_tracing, MAX_ACCOUNTS_PER_CALL};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_defaults_without_file() {
    let config = Config::default();
    assert_eq!(config.tick.interval_ms, 3000);
    assert_eq!(config.chain.account_batch, MAX_ACCOUNTS_PER_CALL);
    assert_eq!(config.chain.max_blocks_per_tick, 10);
    assert_eq!(config.logging.level, "info");
    assert!(!config.logging.json);
    assert!(config.replay.range().unwrap().is_none());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let config = load_config(path.to_str()).unwrap();
    assert_eq!(config.chain.max_blocks_per_tick, 10);
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let file = write_config(
        r#"
[tick]
interval_ms = 500

[replay]
from = 100
to = 200

[logging]
level = "blockwatch_engine=debug,info"
"#,
    );

    let config = load_config(file.path().to_str()).unwrap();
    assert_eq!(config.tick.interval_ms, 500);
    assert_eq!(config.replay.range().unwrap(), Some((100, 200)));
    assert_eq!(config.logging.level, "blockwatch_engine=debug,info");
    assert_eq!(config.chain.account_batch, MAX_ACCOUNTS_PER_CALL);
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let file = write_config("[tick]\ninterval_ms = \"soon\"\n");
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_overrides_apply_and_ignore_garbage() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("BLOCKWATCH_TICK_INTERVAL_MS", "250"),
        ("BLOCKWATCH_REPLAY_FROM", "7"),
        ("BLOCKWATCH_REPLAY_TO", "9"),
        ("BLOCKWATCH_ACCOUNT_BATCH", "not-a-number"),
        ("BLOCKWATCH_LOG_LEVEL", "debug"),
        ("BLOCKWATCH_LOG_JSON", "1"),
    ]);

    let mut config = Config::default();
    apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.tick.interval_ms, 250);
    assert_eq!(config.replay.range().unwrap(), Some((7, 9)));
    assert_eq!(config.chain.account_batch, MAX_ACCOUNTS_PER_CALL);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
fn test_half_open_replay_range_is_invalid() {
    let mut config = Config::default();
    config.replay.from = Some(5);
    assert!(matches!(
        config.replay.range(),
        Err(ConfigError::InvalidReplay(_))
    ));
}

#[test]
fn test_tracing_initializes_once() {
    let mut logging = Config::default().logging;
    logging.level = "not a valid [filter".to_string();
    assert!(init_tracing(&logging));
    assert!(!init_tracing(&logging));
}
