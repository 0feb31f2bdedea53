//! TOML Configuration File Support
//!
//! Centralized configuration loading for agent-link clients, from a TOML file
//! at `~/.config/agent-link/link.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! connect_timeout_ms = 10000
//! send_timeout_ms = 5000
//! keepalive_interval_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! multiplier = 2.0
//! max_delay_ms = 10000
//! jitter = false
//!
//! [profiles]
//! storage_path = "/home/me/.local/share/agent-link/profiles.json"
//!
//! [errors]
//! history_capacity = 50
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::DEFAULT_ERROR_HISTORY;
use crate::retry::RetryConfig;
use crate::transport::config::TransportConfig;

/// Environment variable overriding the connect timeout (ms)
pub const ENV_CONNECT_TIMEOUT: &str = "AGENT_LINK_CONNECT_TIMEOUT";
/// Environment variable overriding the send timeout (ms)
pub const ENV_SEND_TIMEOUT: &str = "AGENT_LINK_SEND_TIMEOUT";
/// Environment variable overriding retry attempts
pub const ENV_RETRY_ATTEMPTS: &str = "AGENT_LINK_RETRY_ATTEMPTS";
/// Environment variable overriding the base retry delay (ms)
pub const ENV_RETRY_BASE_DELAY: &str = "AGENT_LINK_RETRY_BASE_DELAY";
/// Environment variable overriding the profile store path
pub const ENV_PROFILE_STORE: &str = "AGENT_LINK_PROFILE_STORE";
/// Environment variable overriding the error history length
pub const ENV_ERROR_HISTORY: &str = "AGENT_LINK_ERROR_HISTORY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Send timeout in milliseconds
    pub send_timeout_ms: Option<u64>,
    /// Link channel capacity
    pub channel_capacity: Option<usize>,
    /// Keepalive ping interval in seconds (0 = disabled)
    pub keepalive_interval_secs: Option<u64>,
    /// Idle limit in seconds (0 = never)
    pub keepalive_timeout_secs: Option<u64>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Total attempts including the first
    pub max_attempts: Option<u32>,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: Option<u64>,
    /// Growth factor per attempt
    pub multiplier: Option<f64>,
    /// Upper bound on a single delay in milliseconds
    pub max_delay_ms: Option<u64>,
    /// Add up to 25% random jitter
    pub jitter: Option<bool>,
    /// Retry records kept
    pub history_capacity: Option<usize>,
}

/// Profiles section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesToml {
    /// Where saved profiles are persisted
    pub storage_path: Option<PathBuf>,
}

/// Errors section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsToml {
    /// Classified errors kept in history
    pub history_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkToml {
    /// Transport configuration section
    pub transport: TransportToml,
    /// Retry configuration section
    pub retry: RetryToml,
    /// Profile storage section
    pub profiles: ProfilesToml,
    /// Error registry section
    pub errors: ErrorsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for an agent-link client
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Transport configuration
    pub transport: TransportConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Profile store location (`None` = platform data dir)
    pub profile_store_path: Option<PathBuf>,

    /// Classified errors kept in history
    pub error_history_capacity: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            profile_store_path: None,
            error_history_capacity: DEFAULT_ERROR_HISTORY,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the client unusable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.transport.send_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms".to_string(),
            ));
        }
        if self.error_history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "errors.history_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/agent-link/link.toml` or
/// `~/.config/agent-link/link.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agent-link").join("link.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the resulting values fail validation. A missing config file is not
/// an error (defaults are used).
pub fn load_config() -> Result<LinkConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<LinkConfig, ConfigError> {
    let mut config = LinkConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: LinkToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut LinkConfig, toml: &LinkToml) {
    // Transport settings
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.transport.send_timeout_ms {
        config.transport.send_timeout_ms = timeout;
    }
    if let Some(capacity) = toml.transport.channel_capacity {
        config.transport.channel_capacity = capacity;
    }
    if let Some(interval) = toml.transport.keepalive_interval_secs {
        config.transport.keepalive_interval_secs = interval;
    }
    if let Some(timeout) = toml.transport.keepalive_timeout_secs {
        config.transport.keepalive_timeout_secs = timeout;
    }

    // Retry settings
    if let Some(attempts) = toml.retry.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(delay) = toml.retry.base_delay_ms {
        config.retry.base_delay_ms = delay;
    }
    if let Some(multiplier) = toml.retry.multiplier {
        config.retry.multiplier = multiplier;
    }
    if let Some(delay) = toml.retry.max_delay_ms {
        config.retry.max_delay_ms = delay;
    }
    if let Some(jitter) = toml.retry.jitter {
        config.retry.jitter = jitter;
    }
    if let Some(capacity) = toml.retry.history_capacity {
        config.retry.history_capacity = capacity;
    }

    // Profile settings
    if toml.profiles.storage_path.is_some() {
        config.profile_store_path.clone_from(&toml.profiles.storage_path);
    }

    // Error settings
    if let Some(capacity) = toml.errors.history_capacity {
        config.error_history_capacity = capacity;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut LinkConfig) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`
///
/// Unparsable values are ignored with a warning.
fn apply_env_from(config: &mut LinkConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
        let value = value?;
        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(key, value = %value, "Ignoring unparsable environment override");
                None
            }
        }
    }

    if let Some(ms) = parsed(ENV_CONNECT_TIMEOUT, lookup(ENV_CONNECT_TIMEOUT)) {
        config.transport.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed(ENV_SEND_TIMEOUT, lookup(ENV_SEND_TIMEOUT)) {
        config.transport.send_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed(ENV_RETRY_ATTEMPTS, lookup(ENV_RETRY_ATTEMPTS)) {
        config.retry.max_attempts = n;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed(ENV_RETRY_BASE_DELAY, lookup(ENV_RETRY_BASE_DELAY)) {
        config.retry.base_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup(ENV_PROFILE_STORE).filter(|p| !p.trim().is_empty()) {
        config.profile_store_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(n) = parsed(ENV_ERROR_HISTORY, lookup(ENV_ERROR_HISTORY)) {
        config.error_history_capacity = n;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Connect timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,

    /// Retry attempts override
    pub retry_attempts: Option<u32>,

    /// Profile store path override
    pub profile_store_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout override
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set retry attempts override
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Set profile store path override
    #[must_use]
    pub fn with_profile_store_path(mut self, path: PathBuf) -> Self {
        self.profile_store_path = Some(path);
        self
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if an override is invalid.
    pub fn apply(&self, config: &mut LinkConfig) -> Result<(), ConfigError> {
        if self.connect_timeout_ms.is_some()
            || self.retry_attempts.is_some()
            || self.profile_store_path.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(timeout) = self.connect_timeout_ms {
            config.transport.connect_timeout_ms = timeout;
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(ref path) = self.profile_store_path {
            config.profile_store_path = Some(path.clone());
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();

        assert_eq!(config.transport.connect_timeout_ms, 10_000);
        assert_eq!(config.transport.send_timeout_ms, 5000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.error_history_capacity, 50);
        assert!(config.profile_store_path.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("agent-link"));
            assert!(p.to_string_lossy().ends_with("link.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[transport]
connect_timeout_ms = 15000
keepalive_interval_secs = 0

[retry]
max_attempts = 5
multiplier = 1.5
jitter = true

[profiles]
storage_path = "/tmp/agent-link/profiles.json"

[errors]
history_capacity = 10
"#,
        );

        let mut config = LinkConfig::default();
        let toml: LinkToml = toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        apply_toml_config(&mut config, &toml);

        assert_eq!(config.transport.connect_timeout_ms, 15_000);
        assert_eq!(config.transport.send_timeout_ms, 5000);
        assert!(config.transport.keepalive_interval().is_none());
        assert_eq!(config.retry.max_attempts, 5);
        assert!((config.retry.multiplier - 1.5).abs() < f64::EPSILON);
        assert!(config.retry.jitter);
        assert_eq!(
            config.profile_store_path,
            Some(PathBuf::from("/tmp/agent-link/profiles.json"))
        );
        assert_eq!(config.error_history_capacity, 10);
    }

    #[test]
    fn test_load_from_file_sets_source() {
        let file = write_toml("[retry]\nmax_attempts = 4\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_toml("[transport\nconnect_timeout_ms = ");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_sections_ignored() {
        let toml: LinkToml = toml::from_str("[ui]\ntheme = \"dark\"\n").unwrap();
        assert!(toml.transport.connect_timeout_ms.is_none());
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LinkConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = LinkConfig::default();
        config.transport.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.retry.multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_values_fail_load() {
        let file = write_toml("[retry]\nmax_attempts = 0\n");
        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    // =========================================================================
    // Environment & CLI Override Tests
    // =========================================================================

    #[test]
    fn test_env_overrides() {
        let mut config = LinkConfig::default();
        apply_env_from(
            &mut config,
            env(&[
                (ENV_CONNECT_TIMEOUT, "2500"),
                (ENV_RETRY_ATTEMPTS, "7"),
                (ENV_PROFILE_STORE, "/data/profiles.json"),
                (ENV_ERROR_HISTORY, "not-a-number"),
            ]),
        );

        assert_eq!(config.transport.connect_timeout_ms, 2500);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(
            config.profile_store_path,
            Some(PathBuf::from("/data/profiles.json"))
        );
        assert_eq!(config.error_history_capacity, DEFAULT_ERROR_HISTORY);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_env_empty_leaves_source() {
        let mut config = LinkConfig::default();
        apply_env_from(&mut config, env(&[]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = LinkConfig::default();
        apply_env_from(&mut config, env(&[(ENV_CONNECT_TIMEOUT, "2500")]));

        ConfigOverrides::new()
            .with_connect_timeout_ms(1000)
            .with_profile_store_path(PathBuf::from("/cli/profiles.json"))
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.transport.connect_timeout_ms, 1000);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_cli_override_validated() {
        let mut config = LinkConfig::default();
        let result = ConfigOverrides::new().with_retry_attempts(0).apply(&mut config);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
