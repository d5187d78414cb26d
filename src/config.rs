//! Configuration module for the chatmux server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// How inbound bytes are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Newline-delimited messages, buffered across reads.
    Line,
    /// Every transport read is one message.
    Raw,
}

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "chatmux")]
#[command(author = "chatmux authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP chat relay that broadcasts every message to all other clients", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9900)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog for pending connections
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneously connected clients
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Message framing: newline-delimited or one message per read
    #[arg(short = 'f', long, value_enum)]
    pub framing: Option<FramingMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Message framing mode
    #[serde(default = "default_framing")]
    pub framing: FramingMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            framing: default_framing(),
        }
    }
}

/// Resource limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum connected clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bytes requested per receive call
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Longest partial line kept before the sender is disconnected
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Readiness events collected per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            read_chunk_size: default_read_chunk_size(),
            max_line_length: default_max_line_length(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9900".to_string()
}

fn default_backlog() -> i32 {
    512
}

fn default_framing() -> FramingMode {
    FramingMode::Line
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_chunk_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_line_length() -> usize {
    1024 * 1024
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub framing: FramingMode,
    pub max_connections: usize,
    pub read_chunk_size: usize,
    pub max_line_length: usize,
    pub event_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(Some(cli), toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: Option<CliArgs>, toml_config: TomlConfig) -> Self {
        let Some(cli) = cli else {
            return Config {
                listen: toml_config.server.listen,
                backlog: toml_config.server.backlog,
                framing: toml_config.server.framing,
                max_connections: toml_config.limits.max_connections,
                read_chunk_size: toml_config.limits.read_chunk_size,
                max_line_length: toml_config.limits.max_line_length,
                event_capacity: toml_config.limits.event_capacity,
                log_level: toml_config.logging.level,
            };
        };

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            framing: cli.framing.unwrap_or(toml_config.server.framing),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.limits.max_connections),
            read_chunk_size: toml_config.limits.read_chunk_size,
            max_line_length: toml_config.limits.max_line_length,
            event_capacity: toml_config.limits.event_capacity,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen address '{}' is not a socket address",
                self.listen
            )));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive".into()));
        }
        for (name, value) in [
            ("max_connections", self.max_connections),
            ("read_chunk_size", self.read_chunk_size),
            ("max_line_length", self.max_line_length),
            ("event_capacity", self.event_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
