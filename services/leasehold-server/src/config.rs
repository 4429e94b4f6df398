//! Server Configuration
//!
//! Configuration management for the Leasehold server.
//! Supports config files, environment variables and CLI arguments.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};

use leasehold_contracts::LifecycleConfig;
use leasehold_db::DatabaseConfig;
use leasehold_escrow::EscrowConfig;
use leasehold_signature::{OtpConfig, SignatureConfig};
use leasehold_types::PaymentMethod;

/// OTP pepper shipped with the development preset
pub const DEV_OTP_PEPPER: &str = "dev-only-otp-pepper-do-not-deploy";

/// Webhook secret shipped with the development preset
pub const DEV_WEBHOOK_SECRET: &str = "dev-only-webhook-secret-do-not-deploy";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server binding configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Redis or in-memory storage
    #[serde(default)]
    pub storage: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// OTP and signing-link settings
    #[serde(default)]
    pub signature: SignatureConfig,

    #[serde(default)]
    pub escrow: EscrowConfig,

    /// Ed25519 seeds for certificates and receipts
    #[serde(default)]
    pub keys: KeySettings,

    /// Background worker settings
    #[serde(default)]
    pub workers: WorkerSettings,

    /// Phone numbers OTP codes are sent to, for deployments without an
    /// identity service
    #[serde(default)]
    pub directory: Vec<DirectoryEntry>,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time granted to background workers to flush after shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Get the shutdown timeout duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// CORS allowed origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable request tracing
    #[serde(default = "default_true")]
    pub enable_tracing: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: default_cors_origins(),
            enable_tracing: true,
            max_body_size: default_max_body_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
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

/// Hex-encoded 32-byte seeds. A missing seed means a fresh key per process,
/// which only development tolerates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySettings {
    #[serde(default)]
    pub certificate_seed: Option<String>,
    #[serde(default)]
    pub receipt_seed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// How often notice periods are checked for expiry
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub user_id: String,
    pub phone: String,
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60) // 1 hour
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServerConfig {
    /// Load configuration from config files and the environment
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        // An explicit file overrides the default locations
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Environment variables with LEASEHOLD__ prefix, e.g.
        // LEASEHOLD__SIGNATURE__OTP__PEPPER
        builder = builder.add_source(
            config::Environment::with_prefix("LEASEHOLD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        builder
            .build()
            .context("failed to read configuration sources")?
            .try_deserialize()
            .context("invalid configuration")
    }

    /// Create a configuration for development/testing
    pub fn development() -> Self {
        let mut escrow = EscrowConfig::default();
        for method in PaymentMethod::ALL.into_iter().filter(|m| m.is_provider_backed()) {
            escrow
                .webhook_secrets
                .insert(method.as_str().to_string(), DEV_WEBHOOK_SECRET.to_string());
        }

        Self {
            server: ServerSettings::default(),
            storage: DatabaseConfig::in_memory(),
            api: ApiSettings::default(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
            lifecycle: LifecycleConfig::default(),
            signature: SignatureConfig {
                otp: OtpConfig {
                    pepper: DEV_OTP_PEPPER.to_string(),
                    ..OtpConfig::default()
                },
                ..SignatureConfig::default()
            },
            escrow,
            keys: KeySettings::default(),
            workers: WorkerSettings::default(),
            directory: Vec::new(),
        }
    }

    /// Create a configuration for production. Secrets and seeds are left
    /// empty and must come from the environment.
    pub fn production() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
                shutdown_timeout_secs: 30,
            },
            storage: DatabaseConfig::default(),
            api: ApiSettings {
                cors_origins: vec!["https://app.leasehold.io".to_string()],
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            lifecycle: LifecycleConfig::default(),
            signature: SignatureConfig::default(),
            escrow: EscrowConfig::default(),
            keys: KeySettings::default(),
            workers: WorkerSettings::default(),
            directory: Vec::new(),
        }
    }

    /// Check every section; outside development mode also refuse the
    /// shipped secrets and ephemeral keys
    pub fn validate(&self, dev_mode: bool) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.lifecycle.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.signature.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.escrow.validate() {
            errors.extend(e);
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!("unknown log format {}", self.logging.format));
        }
        if self.workers.sweep_interval.is_zero() {
            errors.push("sweep_interval must be positive".to_string());
        }

        if !dev_mode {
            if self.signature.otp.pepper == DEV_OTP_PEPPER {
                errors.push("OTP pepper must be changed outside development mode".to_string());
            }
            if self
                .escrow
                .webhook_secrets
                .values()
                .any(|secret| secret == DEV_WEBHOOK_SECRET)
            {
                errors.push("webhook secrets must be changed outside development mode".to_string());
            }
            if self.keys.certificate_seed.is_none() || self.keys.receipt_seed.is_none() {
                errors.push(
                    "keys.certificate_seed and keys.receipt_seed must be set outside development mode"
                        .to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration: {}", errors.join("; "))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> anyhow::Result<ServerConfig> {
        ServerConfig::from_builder(
            config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_development_config() {
        let config = ServerConfig::development();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.storage.redis_url.is_none());
        assert!(config.escrow.webhook_secret(PaymentMethod::MobileMoneyA).is_some());
        assert!(config.escrow.webhook_secret(PaymentMethod::Cash).is_none());
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_development_secrets_refused_in_production() {
        let err = ServerConfig::development().validate(false).unwrap_err().to_string();
        assert!(err.contains("OTP pepper"));
        assert!(err.contains("webhook secrets"));
        assert!(err.contains("certificate_seed"));
    }

    #[test]
    fn test_production_preset_needs_secrets() {
        let mut config = ServerConfig::production();
        assert_eq!(config.logging.format, "json");
        assert!(config.validate(false).is_err());

        config.signature.otp.pepper = "a-real-pepper-from-the-vault".to_string();
        config.keys.certificate_seed = Some("11".repeat(32));
        config.keys.receipt_seed = Some("22".repeat(32));
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_shipped_default_file_parses() {
        let config = parse(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.lifecycle.retraction_window, Duration::from_secs(48 * 60 * 60));
        assert_eq!(config.escrow.duplicate_window, Duration::from_secs(600));
        assert_eq!(config.workers.sweep_interval, Duration::from_secs(3600));
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse(
            r#"
            [server]
            port = 9000

            [workers]
            sweep_interval = "15m"

            [[directory]]
            user_id = "0b7f8c1e-3a55-4d51-9c51-1f2a3b4c5d6e"
            phone = "+221770000001"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.workers.sweep_interval, Duration::from_secs(900));
        assert_eq!(config.directory.len(), 1);
        assert_eq!(config.lifecycle.default_notice_months, 3);
    }

    #[test]
    fn test_bad_bind_address() {
        let settings = ServerSettings {
            host: "not an address".to_string(),
            ..ServerSettings::default()
        };
        assert!(settings.socket_addr().is_err());
    }
}
