//! Layered configuration for the `edlink` binary.
//!
//! Sources, lowest to highest precedence:
//! 1. built-in defaults
//! 2. `edlink.toml` (or the file given with `--config`)
//! 3. environment variables prefixed `EDLINK_`, nested with `__`
//!    (e.g. `EDLINK_SERVER__URL`, `EDLINK_HEALTH__FAILURE_THRESHOLD`)
//! 4. command-line flags such as `--server`
//!
//! # Example
//! ```toml
//! log_level = "debug"
//! log_format = "compact"
//!
//! [server]
//! url = "http://10.0.0.5:50051"
//!
//! [server.metadata]
//! authorization = "Bearer abc123"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use edlink_client::{
    ClientError, Endpoint, EndpointError, HealthConfig, RequestMetadata, SessionConfig,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::logging::{self, OutputFormat};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "edlink.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "EDLINK_";

/// Top-level CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: OutputFormat,
    /// Where to connect and what to send along
    pub server: ServerSettings,
    /// Heartbeat tunables
    pub health: HealthSettings,
}

/// Server connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server URL, scheme and port required
    pub url: String,
    /// Headers attached to every request
    pub metadata: BTreeMap<String, String>,
}

/// Heartbeat settings, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Pause after a successful heartbeat
    pub heartbeat_interval_ms: u64,
    /// Pause after a failed heartbeat
    pub retry_delay_ms: u64,
    /// Per-heartbeat deadline
    pub heartbeat_timeout_ms: u64,
    /// Consecutive failures that mean the connection is lost
    pub failure_threshold: u32,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
            server: ServerSettings::default(),
            health: HealthSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:50051".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        let health = HealthConfig::default();
        Self {
            heartbeat_interval_ms: duration_ms(health.interval),
            retry_delay_ms: duration_ms(health.retry_delay),
            heartbeat_timeout_ms: duration_ms(health.timeout),
            failure_threshold: health.failure_threshold,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CliConfig {
    /// Load from all sources.
    ///
    /// An explicitly named config file must exist; the default one is
    /// optional.
    pub fn load(config_file: Option<&Path>, server: Option<&str>) -> Result<Self, figment::Error> {
        let path = match config_file {
            Some(path) if !path.exists() => {
                return Err(figment::Error::from(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        Self::extract(Self::figment(&path, ENV_PREFIX), server)
    }

    /// Defaults, then the TOML file, then prefixed environment variables.
    pub fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Apply flag overrides on top of `figment` and deserialize.
    pub fn extract(figment: Figment, server: Option<&str>) -> Result<Self, figment::Error> {
        let figment = match server {
            Some(url) => figment.merge(Serialized::default("server.url", url)),
            None => figment,
        };
        figment.extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        logging::parse_log_level(&self.log_level)?;

        if self.health.failure_threshold == 0 {
            return Err("health.failure_threshold must be at least 1".to_string());
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.health.heartbeat_interval_ms),
            ("retry_delay_ms", self.health.retry_delay_ms),
            ("heartbeat_timeout_ms", self.health.heartbeat_timeout_ms),
        ] {
            if value == 0 {
                return Err(format!("health.{name} must be greater than 0"));
            }
        }

        self.endpoint()
            .map_err(|e| format!("Invalid server.url '{}': {e}", self.server.url))?;
        Ok(())
    }

    /// The configured server endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        Endpoint::parse(&self.server.url)
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> Result<SessionConfig, ClientError> {
        Ok(SessionConfig {
            health: HealthConfig {
                interval: Duration::from_millis(self.health.heartbeat_interval_ms),
                retry_delay: Duration::from_millis(self.health.retry_delay_ms),
                timeout: Duration::from_millis(self.health.heartbeat_timeout_ms),
                failure_threshold: self.health.failure_threshold,
            },
            metadata: RequestMetadata::from_pairs(&self.server.metadata)?,
            ..SessionConfig::default()
        })
    }
}
