//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lower bound for the graceful-termination wait before a forced kill
pub const MIN_GRACE_PERIOD_SECS: u64 = 2;
/// Upper bound for the graceful-termination wait before a forced kill
pub const MAX_GRACE_PERIOD_SECS: u64 = 5;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Directory layout used by the queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Source media, never written by the daemon
    pub media_dir: PathBuf,
    /// Encoder presets (`*.json`)
    pub preset_dir: PathBuf,
    /// Final outputs, written once per job by promotion
    pub output_dir: PathBuf,
    /// Staging outputs while a job is running
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("./media"),
            preset_dir: PathBuf::from("./presets"),
            output_dir: PathBuf::from("./output"),
            temp_dir: PathBuf::from("./temp"),
        }
    }
}

/// External encoder invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Program followed by any leading arguments (e.g. `["nice", "-n", "10", "HandBrakeCLI"]`)
    pub command: Vec<String>,
    /// Arguments appended after the input/output/preset arguments
    pub extra_args: Vec<String>,
    /// Seconds to wait after SIGTERM before killing the encoder
    pub grace_period_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            command: vec!["HandBrakeCLI".to_string()],
            extra_args: vec!["--verbose".to_string()],
            grace_period_secs: MIN_GRACE_PERIOD_SECS,
        }
    }
}

impl EncoderConfig {
    /// Grace period clamped to the supported window
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(
            self.grace_period_secs
                .clamp(MIN_GRACE_PERIOD_SECS, MAX_GRACE_PERIOD_SECS),
        )
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:5000`
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

/// Status view configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    /// Number of history entries returned by the history view
    pub history_limit: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { history_limit: 20 }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MEDIA_DIR, PRESET_DIR, OUTPUT_DIR, TEMP_DIR -> paths.*
    /// - ENCODER_BIN -> encoder.command (single program, no leading args)
    /// - ENCODER_GRACE_SECS -> encoder.grace_period_secs
    /// - SERVER_BIND -> server.bind
    /// - HISTORY_LIMIT -> status.history_limit
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIA_DIR") {
            self.paths.media_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("PRESET_DIR") {
            self.paths.preset_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("TEMP_DIR") {
            self.paths.temp_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("ENCODER_BIN") {
            if !val.trim().is_empty() {
                self.encoder.command = vec![val];
            }
        }

        if let Ok(val) = env::var("ENCODER_GRACE_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.encoder.grace_period_secs = secs;
            }
        }

        if let Ok(val) = env::var("SERVER_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("HISTORY_LIMIT") {
            if let Ok(limit) = val.parse::<usize>() {
                self.status.history_limit = limit;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}
