//! # Configuration Management
//!
//! Centralized configuration for perf bindings.
//!
//! Both peers must agree on the upload and download sizes out of band; nothing
//! about them travels on the wire. This module loads those values together
//! with the request timeout and logging settings.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Defaults
//! - Upload 10 MiB, download 5 MiB
//! - Request timeout 10 hours, which effectively disables it; tighten it for
//!   real deadline enforcement

use crate::core::correlation::CORRELATION_SIZE;
use crate::core::payload::total_len;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol identifier a negotiation layer selects this protocol with
pub const PROTOCOL_ID: &str = "/perf/0.1.0";

/// Default filler bytes per request
pub const DEFAULT_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Default filler bytes per reply
pub const DEFAULT_DOWNLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60 * 60);

/// Largest payload a 4-byte length prefix can describe
pub const MAX_WIRE_PAYLOAD: usize = u32::MAX as usize;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PerfConfig {
    /// Role configuration shared by both peers
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PerfConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup; malformed values are errors
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PERF_UPLOAD_BYTES") {
            self.protocol.upload_size = parse_env("PERF_UPLOAD_BYTES", &val)?;
        }

        if let Some(val) = lookup("PERF_DOWNLOAD_BYTES") {
            self.protocol.download_size = parse_env("PERF_DOWNLOAD_BYTES", &val)?;
        }

        if let Some(val) = lookup("PERF_TIMEOUT_MS") {
            self.protocol.timeout = Duration::from_millis(parse_env("PERF_TIMEOUT_MS", &val)?);
        }

        if let Some(val) = lookup("PERF_MAX_FRAME_SIZE") {
            self.protocol.max_frame_size = Some(parse_env("PERF_MAX_FRAME_SIZE", &val)?);
        }

        if let Some(val) = lookup("PERF_LOG_LEVEL") {
            self.logging.log_level = val.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid PERF_LOG_LEVEL: {val}"))
            })?;
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.protocol.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{val}'")))
}

/// Sizes and deadline for one perf binding
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Filler bytes per request, excluding the correlation prefix
    pub upload_size: usize,

    /// Filler bytes per reply, excluding the correlation prefix
    pub download_size: usize,

    /// Deadline applied to every request of an initiator
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Optional ceiling on frame payloads, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            upload_size: DEFAULT_UPLOAD_SIZE,
            download_size: DEFAULT_DOWNLOAD_SIZE,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_size: None,
        }
    }
}

impl ProtocolConfig {
    pub fn new(upload_size: usize, download_size: usize) -> Self {
        Self {
            upload_size,
            download_size,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = Some(max);
        self
    }

    /// Request payload length on the wire (excluding the length prefix)
    pub fn request_len(&self) -> usize {
        total_len(self.upload_size)
    }

    /// Reply payload length on the wire (excluding the length prefix)
    pub fn reply_len(&self) -> usize {
        total_len(self.download_size)
    }

    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let ceiling = self
            .max_frame_size
            .unwrap_or(MAX_WIRE_PAYLOAD)
            .min(MAX_WIRE_PAYLOAD);

        if self.upload_size > MAX_WIRE_PAYLOAD - CORRELATION_SIZE
            || self.request_len() > ceiling
        {
            errors.push(format!(
                "Upload size {} does not fit in a frame (limit: {} bytes including prefix)",
                self.upload_size, ceiling
            ));
        }

        if self.download_size > MAX_WIRE_PAYLOAD - CORRELATION_SIZE
            || self.reply_len() > ceiling
        {
            errors.push(format!(
                "Download size {} does not fit in a frame (limit: {} bytes including prefix)",
                self.download_size, ceiling
            ));
        }

        if self.timeout.is_zero() {
            errors.push("Request timeout must be greater than 0".to_string());
        }

        if self.max_frame_size == Some(0) {
            errors.push("Max frame size cannot be 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to include the event target in each line
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("perf-protocol"),
            log_level: Level::INFO,
            show_target: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.trim().is_empty() {
            errors.push("Application name cannot be empty".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
