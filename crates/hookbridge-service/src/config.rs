//! Service configuration: server, logging, outbox, and stream settings,
//! plus the embedded hook document (`inbound` + `subscriptions`).
//!
//! Configuration is read from a YAML file and overlaid with
//! `HOOKBRIDGE_`-prefixed environment variables for the deployment-level
//! knobs.

use hookbridge_core::config::HookConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// ServiceConfig
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbox store and delivery worker settings
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Stream fan-out settings; fan-out is disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSettings>,

    /// Identity of this process on the fan-out stream; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_id: Option<String>,

    /// Directory for persisted contracts; in-memory only when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts_dir: Option<PathBuf>,

    /// Inbound sources and subscriber contracts
    #[serde(default)]
    pub hooks: HookConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ServiceConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ServiceConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config: Self =
            serde_yaml::from_str(&text).map_err(|e| ServiceConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `HOOKBRIDGE_*` environment overrides for deployment knobs.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOOKBRIDGE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("HOOKBRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("HOOKBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(redis_url) = std::env::var("HOOKBRIDGE_REDIS_URL") {
            let stream = self.stream.get_or_insert_with(StreamSettings::default);
            stream.redis_url = redis_url;
        }
        if let Ok(daemon_id) = std::env::var("HOOKBRIDGE_DAEMON_ID") {
            self.daemon_id = Some(daemon_id);
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum inbound request body size in bytes
    pub max_body_bytes: usize,

    /// Grace given to in-flight work at shutdown, in seconds
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            max_body_bytes: 1024 * 1024, // 1 MiB
            shutdown_grace_secs: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Env-filter style level directive
    pub level: String,

    /// Emit JSON structured logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Outbox store and delivery worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Entry directory for the filesystem store; in-memory store when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Attempts after which an entry is dead-lettered
    pub max_attempts: u32,

    /// In-flight lease in seconds; expired leases return to pending
    pub lease_secs: u64,

    /// Idle poll interval for the delivery worker, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_attempts: 10,
            lease_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

impl OutboxConfig {
    /// In-flight lease as a `Duration`.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Idle poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Stream fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Redis endpoint, e.g. `redis://127.0.0.1:6379/`
    pub redis_url: String,

    /// Stream key shared by all peer daemons
    pub stream_key: String,

    /// Approximate stream length cap (`XADD MAXLEN ~`)
    pub maxlen: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            stream_key: "hookbridge:events".to_string(),
            maxlen: 1000,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors loading the service configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServiceConfigError {
    #[error("Failed to read configuration file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse configuration file {path}: {message}")]
    Parse { path: String, message: String },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
