//! Configuration management for repograph

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository walk and parse options
    pub build: BuildConfig,

    /// Language server used to disambiguate calls
    pub oracle: OracleConfig,

    /// Multi-repository builds
    pub batch: BatchConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Repository walk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,

    /// Follow symbolic links while walking
    pub follow_links: bool,

    /// Treat a file whose syntax tree contains errors as unparseable
    pub skip_files_with_syntax_errors: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: ["__pycache__", "node_modules", "venv", "build", "dist", "site-packages"]
                .into_iter()
                .map(String::from)
                .collect(),
            follow_links: false,
            skip_files_with_syntax_errors: true,
        }
    }
}

/// Language server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Disable to build without Calls disambiguation
    pub enabled: bool,

    /// Executable to spawn
    pub command: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Maximum wait for the `initialize` handshake
    pub startup_timeout_ms: u64,

    /// Maximum wait for one definition query
    pub request_timeout_ms: u64,

    /// Time allowed for the process to exit after `exit`
    pub shutdown_grace_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "pyright-langserver".to_string(),
            args: vec!["--stdio".to_string()],
            startup_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl OracleConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of projects built concurrently
    pub workers: usize,

    /// 1 = repositories are direct subdirectories, 2 = `category/repo`
    pub discovery_depth: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            discovery_depth: 1,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repograph.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
