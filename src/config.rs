//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::{PoolConfig, Timeouts, MAX_SLOTS};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "tcp-echo-pool")]
#[command(author = "tcp-echo-pool authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo server with a fixed worker pool", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:7777)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// I/O runtime backend
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of worker slots (1-64)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Per-slot buffer size in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Read timeout in seconds
    #[arg(long = "read-timeout")]
    pub read_timeout_secs: Option<u64>,

    /// Write timeout in seconds
    #[arg(long = "write-timeout")]
    pub write_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Which I/O backend drives the worker slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One OS thread per slot, blocking sockets.
    #[default]
    Threads,
    /// One tokio task per slot.
    Tokio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolSection,
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
    pub backlog: u32,
    /// I/O backend
    #[serde(default)]
    pub runtime: RuntimeType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            runtime: RuntimeType::default(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Deserialize)]
pub struct PoolSection {
    /// Number of worker slots
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-slot buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Per-connection read timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Per-connection write timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            buffer_size: default_buffer_size(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
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
    "0.0.0.0:7777".to_string()
}

fn default_backlog() -> u32 {
    16
}

fn default_workers() -> usize {
    8
}

fn default_buffer_size() -> usize {
    4096
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: u32,
    pub runtime: RuntimeType,
    pub workers: usize,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub log_level: String,
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

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen))?;

        let config = Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            workers: cli.workers.unwrap_or(toml_config.pool.workers),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.pool.buffer_size),
            read_timeout: Duration::from_secs(
                cli.read_timeout_secs
                    .unwrap_or(toml_config.pool.read_timeout_secs),
            ),
            write_timeout: Duration::from_secs(
                cli.write_timeout_secs
                    .unwrap_or(toml_config.pool.write_timeout_secs),
            ),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "workers must be between 1 and {MAX_SLOTS}, got {}",
                self.workers
            )));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".into()));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be non-zero".into()));
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "read and write timeouts must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Pool geometry handed to the runtime backends.
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            buffer_size: self.buffer_size,
            timeouts: Timeouts {
                read: self.read_timeout,
                write: self.write_timeout,
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
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
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
