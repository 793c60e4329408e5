//! Watcher configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;

use crate::client::MAX_ACCOUNTS_PER_CALL;

/// Top-level watcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Tick scheduling.
    #[serde(default)]
    pub tick: TickConfig,

    /// Historical replay. Live watching when no range is set.
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Upstream fetch limits.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickConfig {
    /// Delay between live ticks, in milliseconds. Replay ignores it.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Block range to replay, both ends inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub from: Option<u64>,

    #[serde(default)]
    pub to: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Account names per lookup call. Capped at the node's limit.
    #[serde(default = "default_account_batch")]
    pub account_batch: usize,

    /// Most blocks fetched in one tick while catching up.
    #[serde(default = "default_max_blocks_per_tick")]
    pub max_blocks_per_tick: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "blockwatch_engine=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_account_batch() -> usize {
    MAX_ACCOUNTS_PER_CALL
}

fn default_max_blocks_per_tick() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            account_batch: default_account_batch(),
            max_blocks_per_tick: default_max_blocks_per_tick(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ReplayConfig {
    /// The range to replay, or `None` for live watching.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidReplay` if only one end is set or the
    /// range is empty.
    pub fn range(&self) -> Result<Option<(u64, u64)>, ConfigError> {
        match (self.from, self.to) {
            (None, None) => Ok(None),
            (Some(from), Some(to)) if from <= to => Ok(Some((from, to))),
            (Some(from), Some(to)) => Err(ConfigError::InvalidReplay(format!(
                "from ({from}) is past to ({to})"
            ))),
            _ => Err(ConfigError::InvalidReplay(
                "both from and to must be set".to_string(),
            )),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The replay range is unusable.
    #[error("invalid replay range: {0}")]
    InvalidReplay(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `BLOCKWATCH_TICK_INTERVAL_MS` overrides `tick.interval_ms`
/// - `BLOCKWATCH_REPLAY_FROM` overrides `replay.from`
/// - `BLOCKWATCH_REPLAY_TO` overrides `replay.to`
/// - `BLOCKWATCH_ACCOUNT_BATCH` overrides `chain.account_batch`
/// - `BLOCKWATCH_LOG_LEVEL` overrides `logging.level`
/// - `BLOCKWATCH_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `BLOCKWATCH_*` overrides read through `lookup`.
///
/// Values that do not parse are ignored.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(interval) = lookup("BLOCKWATCH_TICK_INTERVAL_MS") {
        if let Ok(parsed) = interval.parse() {
            config.tick.interval_ms = parsed;
        }
    }
    if let Some(from) = lookup("BLOCKWATCH_REPLAY_FROM") {
        if let Ok(parsed) = from.parse() {
            config.replay.from = Some(parsed);
        }
    }
    if let Some(to) = lookup("BLOCKWATCH_REPLAY_TO") {
        if let Ok(parsed) = to.parse() {
            config.replay.to = Some(parsed);
        }
    }
    if let Some(batch) = lookup("BLOCKWATCH_ACCOUNT_BATCH") {
        if let Ok(parsed) = batch.parse() {
            config.chain.account_batch = parsed;
        }
    }
    if let Some(level) = lookup("BLOCKWATCH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("BLOCKWATCH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
