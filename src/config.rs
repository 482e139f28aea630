//! Background jobs configuration.
//!
//! Settings are read from `JOBVISOR_*` environment variables or from a YAML
//! file with the same field names. Both paths start from the defaults below
//! and finish with [`BackgroundJobsConfig::validate`].

use std::path::Path;
use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for the job dispatcher, the Redis store and the supervisor client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    /// Master switch; when off no connection is ever opened.
    pub enabled: bool,

    // Redis settings
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    /// Logical database index selected after connecting.
    pub redis_database: u32,
    /// Prefix applied to every key, joined with `:`.
    pub redis_namespace: String,

    // Status record settings
    /// TTL in seconds of job status records.
    pub max_job_history_ttl: u64,
    /// TTL in seconds of status records for jobs enqueued without status tracking.
    pub track_status_ttl: u64,

    // Supervisor settings
    pub supervisor_host: String,
    pub supervisor_port: u16,
    pub supervisor_user: Option<String>,
    pub supervisor_password: Option<String>,

    /// Console executable that hosts the command shells.
    pub console_path: String,
}

impl Default for BackgroundJobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,

            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_database: 1,
            redis_namespace: "background_jobs".to_string(),

            max_job_history_ttl: 86400,
            track_status_ttl: 86400,

            supervisor_host: "localhost".to_string(),
            supervisor_port: 9001,
            supervisor_user: None,
            supervisor_password: None,

            console_path: "./console".to_string(),
        }
    }
}

impl BackgroundJobsConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JOBVISOR_ENABLED`: Master switch (default: true)
    /// - `JOBVISOR_REDIS_HOST`: Redis host (default: localhost)
    /// - `JOBVISOR_REDIS_PORT`: Redis port (default: 6379)
    /// - `JOBVISOR_REDIS_PASSWORD`: Redis password (default: none)
    /// - `JOBVISOR_REDIS_DATABASE`: Redis database index (default: 1)
    /// - `JOBVISOR_REDIS_NAMESPACE`: Key namespace (default: background_jobs)
    /// - `JOBVISOR_MAX_JOB_HISTORY_TTL`: Job status TTL in seconds (default: 86400)
    /// - `JOBVISOR_TRACK_STATUS_TTL`: Untracked job status TTL in seconds (default: 86400)
    /// - `JOBVISOR_SUPERVISOR_HOST`: supervisord host (default: localhost)
    /// - `JOBVISOR_SUPERVISOR_PORT`: supervisord port (default: 9001)
    /// - `JOBVISOR_SUPERVISOR_USER`: supervisord user (default: none)
    /// - `JOBVISOR_SUPERVISOR_PASSWORD`: supervisord password (default: none)
    /// - `JOBVISOR_CONSOLE_PATH`: Console executable (default: ./console)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("JOBVISOR_ENABLED") {
            config.enabled = parse_env_bool(&val, "JOBVISOR_ENABLED")?;
        }

        // Redis settings
        if let Ok(val) = std::env::var("JOBVISOR_REDIS_HOST") {
            config.redis_host = val;
        }

        if let Ok(val) = std::env::var("JOBVISOR_REDIS_PORT") {
            config.redis_port = parse_env_value(&val, "JOBVISOR_REDIS_PORT")?;
        }

        if let Ok(val) = std::env::var("JOBVISOR_REDIS_PASSWORD") {
            config.redis_password = non_empty(val);
        }

        if let Ok(val) = std::env::var("JOBVISOR_REDIS_DATABASE") {
            config.redis_database = parse_env_value(&val, "JOBVISOR_REDIS_DATABASE")?;
        }

        if let Ok(val) = std::env::var("JOBVISOR_REDIS_NAMESPACE") {
            config.redis_namespace = val;
        }

        // Status record settings
        if let Ok(val) = std::env::var("JOBVISOR_MAX_JOB_HISTORY_TTL") {
            config.max_job_history_ttl = parse_env_value(&val, "JOBVISOR_MAX_JOB_HISTORY_TTL")?;
        }

        if let Ok(val) = std::env::var("JOBVISOR_TRACK_STATUS_TTL") {
            config.track_status_ttl = parse_env_value(&val, "JOBVISOR_TRACK_STATUS_TTL")?;
        }

        // Supervisor settings
        if let Ok(val) = std::env::var("JOBVISOR_SUPERVISOR_HOST") {
            config.supervisor_host = val;
        }

        if let Ok(val) = std::env::var("JOBVISOR_SUPERVISOR_PORT") {
            config.supervisor_port = parse_env_value(&val, "JOBVISOR_SUPERVISOR_PORT")?;
        }

        if let Ok(val) = std::env::var("JOBVISOR_SUPERVISOR_USER") {
            config.supervisor_user = non_empty(val);
        }

        if let Ok(val) = std::env::var("JOBVISOR_SUPERVISOR_PASSWORD") {
            config.supervisor_password = non_empty(val);
        }

        if let Ok(val) = std::env::var("JOBVISOR_CONSOLE_PATH") {
            config.console_path = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file. Missing fields keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_host must not be empty".to_string(),
            ));
        }

        if self.redis_port == 0 {
            return Err(ConfigError::ValidationFailed(
                "redis_port must be greater than 0".to_string(),
            ));
        }

        if self.redis_namespace.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationFailed(
                "redis_namespace must not contain whitespace".to_string(),
            ));
        }

        if self.max_job_history_ttl == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_job_history_ttl must be greater than 0".to_string(),
            ));
        }

        if self.track_status_ttl == 0 {
            return Err(ConfigError::ValidationFailed(
                "track_status_ttl must be greater than 0".to_string(),
            ));
        }

        if self.supervisor_host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "supervisor_host must not be empty".to_string(),
            ));
        }

        if self.supervisor_port == 0 {
            return Err(ConfigError::ValidationFailed(
                "supervisor_port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Redis connection target, including password and database index.
    ///
    /// Built from parts so that passwords need no URL escaping.
    pub fn redis_connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.redis_host.clone(), self.redis_port),
            redis: RedisConnectionInfo {
                db: i64::from(self.redis_database),
                password: self.redis_password.clone(),
                ..Default::default()
            },
        }
    }

    /// XML-RPC endpoint of the supervisor daemon.
    pub fn supervisor_url(&self) -> String {
        format!(
            "http://{}:{}/RPC2",
            self.supervisor_host, self.supervisor_port
        )
    }

    /// Basic-auth credentials, only when both user and password are set.
    pub fn supervisor_credentials(&self) -> Option<(&str, &str)> {
        match (
            self.supervisor_user.as_deref(),
            self.supervisor_password.as_deref(),
        ) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }

    pub fn max_job_history(&self) -> Duration {
        Duration::from_secs(self.max_job_history_ttl)
    }

    pub fn track_status(&self) -> Duration {
        Duration::from_secs(self.track_status_ttl)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
