use serde::Deserialize;
use std::net::SocketAddr;

use domain::services::DEFAULT_THRESHOLD_PROPERTY;
use shared::jwt::{DEFAULT_ISSUER, DEFAULT_LEEWAY_SECS};
use shared::validation::DEFAULT_EMAIL_DOMAIN;

/// Shortest accepted JWT service secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub outbox: OutboxSettings,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Seconds to wait for queued emails and pushes on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

/// Which store implementation backs the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store; data is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Per-client limit on the unauthenticated account endpoints
    /// (signup, login, password reset). Zero disables it.
    #[serde(default = "default_auth_rate_limit")]
    pub auth_rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            auth_rate_limit_per_minute: default_auth_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Service secret for access tokens; also mixed into refresh token keys.
    pub secret: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    #[serde(default = "default_reset_token_expiry")]
    pub reset_token_expiry_secs: i64,

    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Domain every account email must belong to.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,

    /// Name of the stored property holding the invitation threshold.
    #[serde(default = "default_threshold_property")]
    pub threshold_property: String,

    /// Written at startup when set; otherwise the stored value is kept.
    #[serde(default)]
    pub initial_threshold: Option<u32>,

    #[serde(default)]
    pub invite_job_enabled: bool,

    #[serde(default = "default_invite_interval")]
    pub invite_interval_minutes: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            email_domain: default_email_domain(),
            threshold_property: default_threshold_property(),
            initial_threshold: None,
            invite_job_enabled: false,
            invite_interval_minutes: default_invite_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxSettings {
    #[serde(default = "default_outbox_capacity")]
    pub capacity: usize,

    #[serde(default = "default_outbox_workers")]
    pub workers: usize,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            capacity: default_outbox_capacity(),
            workers: default_outbox_workers(),
        }
    }
}

impl From<&OutboxSettings> for domain::services::OutboxConfig {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            capacity: settings.capacity,
            workers: settings.workers,
        }
    }
}

/// Email service configuration for verification and password reset emails.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Email provider: sendgrid, or console (for development)
    #[serde(default = "default_email_provider")]
    pub provider: String,

    /// SendGrid API key (for sendgrid provider)
    #[serde(default)]
    pub sendgrid_api_key: String,

    /// Sender email address (From header)
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Sender name (From header)
    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Base URL for password reset links (e.g., https://pittgrub.example.edu)
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_email_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_email_provider(),
            sendgrid_api_key: String::new(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            base_url: String::new(),
            timeout_ms: default_email_timeout_ms(),
        }
    }
}

/// Expo push service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// When disabled, pushes are logged and dropped.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_expo_url")]
    pub expo_url: String,

    /// Optional Expo access token for projects with enhanced push security.
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_push_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_push_retries")]
    pub max_retries: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expo_url: default_expo_url(),
            access_token: String::new(),
            timeout_ms: default_push_timeout_ms(),
            max_retries: default_push_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationConfig {
    /// Average acceptance probability used for capacity-aware recommendation
    /// when a request does not supply one.
    #[serde(default)]
    pub avg_acceptance: Option<f64>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_auth_rate_limit() -> u32 {
    30
}
fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}
fn default_access_token_expiry() -> i64 {
    7200 // 2 hours
}
fn default_reset_token_expiry() -> i64 {
    86400 // 24 hours
}
fn default_jwt_leeway() -> u64 {
    DEFAULT_LEEWAY_SECS
}
fn default_email_domain() -> String {
    DEFAULT_EMAIL_DOMAIN.to_string()
}
fn default_threshold_property() -> String {
    DEFAULT_THRESHOLD_PROPERTY.to_string()
}
fn default_invite_interval() -> u64 {
    60
}
fn default_outbox_capacity() -> usize {
    1024
}
fn default_outbox_workers() -> usize {
    4
}
fn default_email_provider() -> String {
    "console".to_string()
}
fn default_sender_email() -> String {
    "noreply@pittgrub.app".to_string()
}
fn default_sender_name() -> String {
    "PittGrub Support".to_string()
}
fn default_email_timeout_ms() -> u64 {
    10000
}
fn default_expo_url() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}
fn default_push_timeout_ms() -> u64 {
    10000
}
fn default_push_retries() -> u32 {
    3
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Embedded defaults so tests do not depend on config files.
const TEST_DEFAULTS: &str = r#"
    [server]
    host = "127.0.0.1"
    port = 8080
    request_timeout_secs = 30
    shutdown_grace_secs = 1

    [database]
    url = ""

    [storage]
    backend = "memory"

    [logging]
    level = "debug"
    format = "pretty"

    [security]
    cors_origins = []
    auth_rate_limit_per_minute = 0

    [jwt]
    secret = "test-secret-that-is-long-enough-for-hs256"
    issuer = "PittGrub"
    access_token_expiry_secs = 7200
    reset_token_expiry_secs = 86400
    leeway_secs = 0

    [admission]
    email_domain = "pitt.edu"
    threshold_property = "invite_threshold"
    invite_job_enabled = false

    [outbox]
    capacity = 64
    workers = 1

    [email]
    provider = "console"
    sender_email = "test@example.com"
    sender_name = "Test"

    [push]
    enabled = false
"#;

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FS__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FS").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Starts from embedded defaults (in-memory storage, console email,
    /// pushes disabled, no rate limiting) and applies `overrides`.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(TEST_DEFAULTS, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "FS__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigValidationError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes (FS__JWT__SECRET)",
                MIN_JWT_SECRET_LEN
            )));
        }

        if self.jwt.access_token_expiry_secs <= 0 || self.jwt.reset_token_expiry_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }

        if self.outbox.workers == 0 || self.outbox.capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "outbox workers and capacity must be at least 1".to_string(),
            ));
        }

        if let Some(p) = self.recommendation.avg_acceptance {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "recommendation.avg_acceptance must be in (0, 1], got {}",
                    p
                )));
            }
        }

        if self.email.provider == "sendgrid" && self.email.sendgrid_api_key.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "email.sendgrid_api_key is required for the sendgrid provider".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config::load_for_test(&[]).expect("Failed to load config")
    }

    #[test]
    fn test_config_load_with_defaults() {
        let config = valid();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.jwt.issuer, "PittGrub");
        assert_eq!(config.admission.email_domain, "pitt.edu");
        assert_eq!(config.admission.initial_threshold, None);
        assert_eq!(config.push.expo_url, "https://exp.host/--/api/v2/push/send");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_override() {
        let config = Config::load_for_test(&[
            ("server.port", "9000"),
            ("logging.level", "warn"),
            ("admission.initial_threshold", "25"),
            ("recommendation.avg_acceptance", "0.4"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.admission.initial_threshold, Some(25));
        assert_eq!(config.recommendation.avg_acceptance, Some(0.4));
    }

    #[test]
    fn test_config_validation_missing_db_url() {
        let config = Config::load_for_test(&[("storage.backend", "postgres")])
            .expect("Failed to load config");
        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("FS__DATABASE__URL"));
    }

    #[test]
    fn test_config_validation_short_secret() {
        let config =
            Config::load_for_test(&[("jwt.secret", "short")]).expect("Failed to load config");
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("jwt.secret"));
    }

    #[test]
    fn test_config_validation_probability_range() {
        for bad in ["0", "1.5", "-0.2"] {
            let config = Config::load_for_test(&[("recommendation.avg_acceptance", bad)])
                .expect("Failed to load config");
            assert!(config.validate().is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_config_validation_zero_workers() {
        let config =
            Config::load_for_test(&[("outbox.workers", "0")]).expect("Failed to load config");
        assert!(config.validate().unwrap_err().to_string().contains("outbox"));
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::load_for_test(&[("server.port", "3000")])
            .expect("Failed to load config");
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:3000");
    }
}
