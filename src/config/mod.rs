//! Configuration management
//!
//! This module handles loading and parsing configuration for Inkpot.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Public site configuration
    #[serde(default)]
    pub site: SiteConfig,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Public site configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Public host name used when rendering absolute links
    #[serde(default = "default_site_host")]
    pub host: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            host: default_site_host(),
        }
    }
}

fn default_site_host() -> String {
    "localhost:8080".to_string()
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session storage driver (memory or redis)
    #[serde(default)]
    pub driver: SessionDriver,
    /// Partition label inside a shared store
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Cookie carrying the session token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Session lifetime in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u64,
    /// Extend sessions that are past half their lifetime when accessed
    #[serde(default = "default_true")]
    pub refresh_on_access: bool,
    /// How often the memory driver drops expired sessions
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: SessionDriver::default(),
            name: default_session_name(),
            cookie_name: default_cookie_name(),
            max_duration_seconds: default_max_duration(),
            refresh_on_access: true,
            purge_interval_seconds: default_purge_interval(),
            redis: RedisConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds)
    }
}

fn default_session_name() -> String {
    "inkpot".to_string()
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_max_duration() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_purge_interval() -> u64 {
    300
}

/// Session storage driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionDriver {
    /// In-process storage (default)
    #[default]
    Memory,
    /// Redis storage
    Redis,
}

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    /// Database index
    #[serde(default)]
    pub db: i64,
    /// Bound on every Redis call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - INKPOT_SERVER_HOST / INKPOT_SERVER_PORT
    /// - INKPOT_SITE_HOST
    /// - INKPOT_SESSION_DRIVER / INKPOT_SESSION_NAME / INKPOT_SESSION_COOKIE_NAME
    /// - INKPOT_SESSION_MAX_DURATION_SECONDS
    /// - INKPOT_REDIS_HOST / INKPOT_REDIS_PORT / INKPOT_REDIS_PASSWORD
    /// - INKPOT_REDIS_DB / INKPOT_REDIS_TIMEOUT_MS
    ///
    /// The result is validated.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session layer cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::session::network::validate_session_name(&self.session.name)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if self.session.cookie_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "session cookie name must not be empty".to_string(),
            ));
        }
        if self.session.max_duration_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "session max duration must be greater than zero".to_string(),
            ));
        }
        if self.session.redis.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "redis timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INKPOT_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("INKPOT_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(host) = std::env::var("INKPOT_SITE_HOST") {
            self.site.host = host;
        }

        if let Ok(driver) = std::env::var("INKPOT_SESSION_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.session.driver = SessionDriver::Memory,
                "redis" => self.session.driver = SessionDriver::Redis,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(name) = std::env::var("INKPOT_SESSION_NAME") {
            self.session.name = name;
        }
        if let Ok(cookie_name) = std::env::var("INKPOT_SESSION_COOKIE_NAME") {
            self.session.cookie_name = cookie_name;
        }
        if let Ok(secs) = std::env::var("INKPOT_SESSION_MAX_DURATION_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.session.max_duration_seconds = secs;
            }
        }

        if let Ok(host) = std::env::var("INKPOT_REDIS_HOST") {
            self.session.redis.host = host;
        }
        if let Ok(port) = std::env::var("INKPOT_REDIS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.session.redis.port = port;
            }
        }
        if let Ok(password) = std::env::var("INKPOT_REDIS_PASSWORD") {
            self.session.redis.password = Some(password);
        }
        if let Ok(db) = std::env::var("INKPOT_REDIS_DB") {
            if let Ok(db) = db.parse::<i64>() {
                self.session.redis.db = db;
            }
        }
        if let Ok(timeout) = std::env::var("INKPOT_REDIS_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.session.redis.timeout_ms = timeout;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
