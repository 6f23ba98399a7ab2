use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};

use crate::broker::definitions::Definitions;
use crate::broker::BrokerSettings;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "WARREN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "warren.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Prefetch for channels that never call `qos`. 0 means unlimited.
    pub default_prefetch: u16,
    /// Log dropped unroutable messages at `warn` instead of `debug`.
    pub warn_on_unroutable: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_prefetch: 0,
            warn_on_unroutable: true,
        }
    }
}

impl From<&BrokerConfig> for BrokerSettings {
    fn from(config: &BrokerConfig) -> Self {
        BrokerSettings {
            default_prefetch: config.default_prefetch,
            warn_on_unroutable: config.warn_on_unroutable,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
    /// Exchanges, queues and bindings declared at startup.
    pub topology: Definitions,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}

/// Loads `path` when it exists, otherwise returns the defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

/// `$WARREN_CONFIG`, falling back to `warren.toml` in the working directory.
pub fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.broker.warn_on_unroutable);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_broker_table_keeps_other_defaults() {
        let config: Config = toml::from_str("[broker]\ndefault_prefetch = 1\n").unwrap();
        assert_eq!(config.broker.default_prefetch, 1);
        assert!(config.broker.warn_on_unroutable);
    }
}
