//! Application configuration
//!
//! Layered from an optional TOML file and `BLINKSENSE__*` environment
//! variables, e.g. `BLINKSENSE__DETECTOR__EAR_THRESHOLD=0.22`.

use std::path::PathBuf;

use alerting::SinkSpec;
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use pipeline::DetectorSettings;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "BLINKSENSE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "blinksense.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub detector: DetectorSettings,
    pub alert: AlertConfig,
    pub logging: LoggingConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Alert sinks, tried in order until one plays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub sinks: Vec<SinkSpec>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sinks: SinkSpec::default_chain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Landmark feed location; stdin when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the config file (if present) and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_builder(Config::builder().add_source(File::with_name(&path).required(false)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, config::ConfigError> {
        builder
            .add_source(
                Environment::with_prefix("BLINKSENSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
