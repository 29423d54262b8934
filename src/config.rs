//! Configuration for the jsonframe binaries.
//!
//! The server takes its address from positional arguments and everything
//! else from an optional TOML file. CLI flags take precedence over file values.

use crate::runtime::{Limits, ServerSettings, DEFAULT_RECV_CHUNK};
use crate::translate::TranslationTable;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "jsonframe-server")]
#[command(version)]
#[command(about = "Answers framed JSON translation requests", long_about = None)]
pub struct ServerArgs {
    /// Host or IP address to bind to
    pub host: String,

    /// TCP port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of open connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "jsonframe-client")]
#[command(version)]
#[command(about = "Sends one framed JSON request and prints the result", long_about = None)]
pub struct ClientArgs {
    /// Server host or IP address
    pub host: String,

    /// Server TCP port
    pub port: u16,

    /// Request action (e.g. "traduzir")
    pub action: String,

    /// Request value (e.g. "hello")
    pub value: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Replaces the built-in table when non-empty.
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

/// Dispatcher and connection tunables
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    #[serde(default = "default_recv_chunk_size")]
    pub recv_chunk_size: usize,
    /// Largest accepted content-length; 0 means unlimited
    #[serde(default)]
    pub max_content_length: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
            recv_chunk_size: default_recv_chunk_size(),
            max_content_length: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_max_connections() -> usize {
    1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_recv_chunk_size() -> usize {
    DEFAULT_RECV_CHUNK
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub settings: ServerSettings,
    pub log_level: String,
    pub table: TranslationTable,
}

impl Config {
    /// Load configuration from process arguments and the optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: ServerArgs, file: TomlConfig) -> Self {
        let table = if file.translations.is_empty() {
            TranslationTable::default()
        } else {
            TranslationTable::new(file.translations)
        };

        Config {
            host: cli.host,
            port: cli.port,
            settings: ServerSettings {
                max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
                events_capacity: file.server.events_capacity.max(1),
                limits: Limits {
                    recv_chunk_size: file.server.recv_chunk_size.max(1),
                    max_content_length: Some(file.server.max_content_length)
                        .filter(|max| *max > 0),
                },
            },
            log_level: cli.log_level.unwrap_or(file.logging.level),
            table,
        }
    }

    /// Resolve `host:port` to the first matching socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.port)
    }
}

impl ClientArgs {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.port)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let address = format!("{host}:{port}");
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::Address(address.clone(), e))?
        .next()
        .ok_or_else(|| {
            ConfigError::Address(
                address,
                io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            )
        })
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid address '{0}': {1}")]
    Address(String, #[source] io::Error),
}
