//! Configuration for the attachment relay service.
//!
//! Settings are layered, lowest precedence first: built-in defaults, an
//! optional `config/relay.*` file, an optional `/etc/attachment-relay/relay.*`
//! file, `RELAY__*` environment variables, and finally the well-known variable
//! names used by existing deployments (`GOOGLE_SERVICE_ACCOUNT_KEY`,
//! `GOOGLE_DRIVE_FOLDER_ID`, `DISCORD_BOT_TOKEN`).

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Inline service-account key JSON.
pub const SERVICE_ACCOUNT_KEY_VAR: &str = "GOOGLE_SERVICE_ACCOUNT_KEY";
/// Destination Drive folder id.
pub const FOLDER_ID_VAR: &str = "GOOGLE_DRIVE_FOLDER_ID";
/// Discord bot token.
pub const DISCORD_TOKEN_VAR: &str = "DISCORD_BOT_TOKEN";

/// Resumable upload chunks must be a multiple of this size.
pub const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the relay service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Google Drive configuration
    #[serde(default)]
    pub drive: DriveConfig,
    /// Discord configuration
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Attachment download configuration
    #[serde(default)]
    pub download: DownloadConfig,
    /// Local staging configuration
    #[serde(default)]
    pub staging: StagingConfig,
    /// Liveness endpoint configuration
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter port; the exporter is not started when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Google Drive configuration
#[derive(Clone, Deserialize)]
pub struct DriveConfig {
    /// Destination folder id
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Inline service-account key JSON
    #[serde(default)]
    pub service_account_key: Option<String>,
    /// Path to a service-account key file, used when no inline key is set
    #[serde(default)]
    pub service_account_key_path: Option<PathBuf>,
    /// Base URL of the Drive upload API
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    /// OAuth scope requested for the access token
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Resumable upload chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Per-request timeout for Drive calls in seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Discord configuration
#[derive(Clone, Default, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    #[serde(default)]
    pub token: Option<String>,
}

/// Attachment download configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadConfig {
    /// Per-request timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Staging area configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Directory staging files are written to
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

/// Liveness endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// Serve the liveness endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Listen address
    #[serde(default = "default_liveness_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_liveness_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "attachment-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upload_url() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}

fn default_scope() -> String {
    "https://www.googleapis.com/auth/drive".to_string()
}

fn default_chunk_size() -> usize {
    32 * UPLOAD_CHUNK_GRANULARITY // 8MB
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

fn default_true() -> bool {
    true
}

fn default_liveness_host() -> String {
    "0.0.0.0".to_string()
}

fn default_liveness_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from config files and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/attachment-relay/relay").required(false));

        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::assemble(builder, &vars)
    }

    /// Build configuration from an explicit set of environment variables only
    pub fn from_env_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::assemble(config::Config::builder(), vars)
    }

    fn assemble(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let env_source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let settings = builder
            // RELAY__DRIVE__FOLDER_ID -> drive.folder_id
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .source(Some(env_source)),
            )
            .set_override_option("drive.service_account_key", non_empty(vars, SERVICE_ACCOUNT_KEY_VAR))?
            .set_override_option("drive.folder_id", non_empty(vars, FOLDER_ID_VAR))?
            .set_override_option("discord.token", non_empty(vars, DISCORD_TOKEN_VAR))?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check values that cannot be expressed through serde defaults
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drive.folder_id()?;

        let chunk = self.drive.chunk_size_bytes;
        if chunk == 0 || chunk % UPLOAD_CHUNK_GRANULARITY != 0 {
            return Err(ConfigError::InvalidValue {
                key: "drive.chunk_size_bytes".to_string(),
                message: format!(
                    "{chunk} is not a positive multiple of {UPLOAD_CHUNK_GRANULARITY}"
                ),
            });
        }

        if self.liveness.enabled && self.liveness.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "liveness.port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

impl DriveConfig {
    /// Destination folder id; required for the service to start
    pub fn folder_id(&self) -> Result<&str, ConfigError> {
        self.folder_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired(FOLDER_ID_VAR.to_string()))
    }

    /// Whether any service-account credential source is configured
    pub fn has_credentials(&self) -> bool {
        self.service_account_key.is_some() || self.service_account_key_path.is_some()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl LivenessConfig {
    /// Socket address string to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            service_account_key: None,
            service_account_key_path: None,
            upload_url: default_upload_url(),
            scope: default_scope(),
            chunk_size_bytes: default_chunk_size(),
            request_timeout_secs: None,
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_liveness_host(),
            port: default_liveness_port(),
        }
    }
}

impl fmt::Debug for DriveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveConfig")
            .field("folder_id", &self.folder_id)
            .field(
                "service_account_key",
                &self.service_account_key.as_ref().map(|_| "[redacted]"),
            )
            .field("service_account_key_path", &self.service_account_key_path)
            .field("upload_url", &self.upload_url)
            .field("scope", &self.scope)
            .field("chunk_size_bytes", &self.chunk_size_bytes)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_env_vars(&HashMap::new()).unwrap();
        assert_eq!(config.service.name, "attachment-relay");
        assert_eq!(config.liveness.port, 8080);
        assert_eq!(config.drive.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.staging.dir, PathBuf::from("staging"));
        assert!(config.discord.token.is_none());
        assert!(!config.drive.has_credentials());
    }

    #[test]
    fn test_well_known_variables() {
        let config = Config::from_env_vars(&vars(&[
            (FOLDER_ID_VAR, "folder-123"),
            (DISCORD_TOKEN_VAR, "token-abc"),
            (SERVICE_ACCOUNT_KEY_VAR, r#"{"client_email":"a@b"}"#),
        ]))
        .unwrap();

        assert_eq!(config.drive.folder_id().unwrap(), "folder-123");
        assert_eq!(config.discord.token.as_deref(), Some("token-abc"));
        assert!(config.drive.has_credentials());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefixed_variables() {
        let config = Config::from_env_vars(&vars(&[
            ("RELAY__DRIVE__FOLDER_ID", "from-prefixed"),
            ("RELAY__LIVENESS__PORT", "9000"),
            ("RELAY__STAGING__DIR", "/tmp/relay"),
        ]))
        .unwrap();

        assert_eq!(config.drive.folder_id().unwrap(), "from-prefixed");
        assert_eq!(config.liveness.port, 9000);
        assert_eq!(config.staging.dir, PathBuf::from("/tmp/relay"));
    }

    #[test]
    fn test_numeric_looking_strings_are_kept_verbatim() {
        let config = Config::from_env_vars(&vars(&[
            ("RELAY__DRIVE__FOLDER_ID", "0012345"),
            ("RELAY__STAGING__DIR", "007"),
            ("RELAY__DISCORD__TOKEN", "true"),
            ("RELAY__LIVENESS__ENABLED", "false"),
            ("RELAY__SERVICE__METRICS_PORT", "9100"),
        ]))
        .unwrap();

        assert_eq!(config.drive.folder_id().unwrap(), "0012345");
        assert_eq!(config.staging.dir, PathBuf::from("007"));
        assert_eq!(config.discord.token.as_deref(), Some("true"));
        assert!(!config.liveness.enabled);
        assert_eq!(config.service.metrics_port, Some(9100));
    }

    #[test]
    fn test_well_known_name_wins_over_prefixed() {
        let config = Config::from_env_vars(&vars(&[
            ("RELAY__DRIVE__FOLDER_ID", "prefixed"),
            (FOLDER_ID_VAR, "well-known"),
        ]))
        .unwrap();

        assert_eq!(config.drive.folder_id().unwrap(), "well-known");
    }

    #[test]
    fn test_missing_folder_id_is_fatal() {
        let config = Config::from_env_vars(&vars(&[(DISCORD_TOKEN_VAR, "t")])).unwrap();
        match config.validate() {
            Err(ConfigError::MissingRequired(name)) => assert_eq!(name, FOLDER_ID_VAR),
            other => panic!("expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_folder_id_is_missing() {
        let config = Config::from_env_vars(&vars(&[(FOLDER_ID_VAR, "   ")])).unwrap();
        assert!(config.drive.folder_id().is_err());
    }

    #[test]
    fn test_chunk_size_must_be_aligned() {
        let mut config = Config::from_env_vars(&vars(&[(FOLDER_ID_VAR, "f")])).unwrap();
        config.drive.chunk_size_bytes = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.drive.chunk_size_bytes = 0;
        assert!(config.validate().is_err());

        config.drive.chunk_size_bytes = 2 * UPLOAD_CHUNK_GRANULARITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_env_vars(&vars(&[
            (DISCORD_TOKEN_VAR, "super-secret-token"),
            (SERVICE_ACCOUNT_KEY_VAR, "super-secret-key"),
        ]))
        .unwrap();

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("[redacted]"));
    }
}
