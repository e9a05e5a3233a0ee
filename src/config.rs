use base64::engine::general_purpose;
use base64::Engine;
use config::{Config, ConfigError as BaseConfigError, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SecurityConfig {
    pub admin_username: String,
    pub admin_password_hash: String,
    pub unlock_token_secret: String,
    pub cookie_secure: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_minutes: u64,
    /// Remaining lifetime below which a validated session is renewed.
    /// Zero means "half of ttl_minutes".
    pub renew_within_minutes: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct DefaultsConfig {
    pub file_expiration_hours: u64,
    pub max_expiration_hours: u64,
    pub download_limit: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] BaseConfigError),
    #[error("Storage directory error: {0}")]
    StorageDir(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut settings = Config::builder();

        // Add default settings
        settings = settings.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        settings = settings.add_source(File::with_name("config").required(false));

        // Add environment variables with explicit mapping for nested fields
        settings = settings
            // Server settings
            .set_override(
                "server.bind_addr",
                std::env::var("SERVER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            )?
            .set_override(
                "server.port",
                std::env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse::<u16>()
                    .unwrap_or(8080),
            )?
            // Database settings
            .set_override(
                "database.url",
                std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:./data/kapsel.db?mode=rwc".to_string()),
            )?
            .set_override(
                "database.max_connections",
                std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse::<u32>()
                    .unwrap_or(10),
            )?
            // Storage settings
            .set_override(
                "storage.root",
                std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data/storage".to_string()),
            )?
            .set_override(
                "storage.max_file_size_bytes",
                std::env::var("MAX_FILE_SIZE_BYTES")
                    .unwrap_or_else(|_| "52428800".to_string())
                    .parse::<u64>()
                    .unwrap_or(52428800),
            )?
            // Security settings
            .set_override(
                "security.admin_username",
                std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            )?
            .set_override(
                "security.admin_password_hash",
                std::env::var("ADMIN_PASSWORD_HASH").unwrap_or_else(|_| "".to_string()),
            )?
            .set_override(
                "security.unlock_token_secret",
                std::env::var("UNLOCK_TOKEN_SECRET").unwrap_or_else(|_| "".to_string()),
            )?
            .set_override(
                "security.cookie_secure",
                std::env::var("COOKIE_SECURE")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse::<bool>()
                    .unwrap_or(false),
            )?
            // Session settings
            .set_override(
                "session.cookie_name",
                std::env::var("SESSION_COOKIE_NAME")
                    .unwrap_or_else(|_| "session_token".to_string()),
            )?
            .set_override(
                "session.ttl_minutes",
                std::env::var("SESSION_TTL_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .unwrap_or(30),
            )?
            .set_override(
                "session.renew_within_minutes",
                std::env::var("SESSION_RENEW_WITHIN_MINUTES")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse::<u64>()
                    .unwrap_or(0),
            )?
            // Defaults settings
            .set_override(
                "defaults.file_expiration_hours",
                std::env::var("DEFAULT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "168".to_string())
                    .parse::<u64>()
                    .unwrap_or(168),
            )?
            .set_override(
                "defaults.max_expiration_hours",
                std::env::var("MAX_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "2160".to_string())
                    .parse::<u64>()
                    .unwrap_or(2160),
            )?
            .set_override(
                "defaults.download_limit",
                std::env::var("DEFAULT_DOWNLOAD_LIMIT")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse::<u64>()
                    .unwrap_or(3),
            )?;

        let settings = settings.build()?;

        let mut config: AppConfig = settings.try_deserialize()?;

        // Validate and normalize configuration
        config.validate()?;

        Ok(config)
    }

    /// Effective renewal window: the configured value, or half the TTL when unset.
    pub fn renew_within_minutes(&self) -> u64 {
        if self.session.renew_within_minutes == 0 {
            self.session.ttl_minutes / 2
        } else {
            self.session.renew_within_minutes
        }
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        // Validate server configuration
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        // Validate storage configuration
        if self.storage.max_file_size_bytes < 1024 * 1024 {
            return Err(ConfigError::Validation(
                "MAX_FILE_SIZE_BYTES must be at least 1MB".to_string(),
            ));
        }
        if self.storage.max_file_size_bytes > 5 * 1024 * 1024 * 1024 {
            return Err(ConfigError::Validation(
                "MAX_FILE_SIZE_BYTES cannot exceed 5GB".to_string(),
            ));
        }

        // Ensure storage directory exists or can be created
        if let Err(e) = fs::create_dir_all(&self.storage.root) {
            return Err(ConfigError::StorageDir(format!(
                "Cannot create storage directory {}: {}",
                self.storage.root.display(),
                e
            )));
        }

        // Validate security configuration
        if self.security.admin_username.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ADMIN_USERNAME cannot be empty".to_string(),
            ));
        }

        // Handle base64: prefix by checking the actual decoded length
        let unlock_secret_len = if self.security.unlock_token_secret.starts_with("base64:") {
            general_purpose::STANDARD
                .decode(
                    self.security
                        .unlock_token_secret
                        .trim_start_matches("base64:"),
                )
                .map_err(|e| {
                    ConfigError::Validation(format!(
                        "Invalid base64 for UNLOCK_TOKEN_SECRET: {}",
                        e
                    ))
                })?
                .len()
        } else {
            self.security.unlock_token_secret.len()
        };

        if unlock_secret_len < 32 {
            return Err(ConfigError::Validation(
                "UNLOCK_TOKEN_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        // Validate session configuration
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "SESSION_COOKIE_NAME cannot be empty".to_string(),
            ));
        }
        if self.session.ttl_minutes < 5 || self.session.ttl_minutes > 1440 {
            return Err(ConfigError::Validation(
                "SESSION_TTL_MINUTES must be between 5 and 1440 (24 hours)".to_string(),
            ));
        }
        if self.session.renew_within_minutes >= self.session.ttl_minutes {
            return Err(ConfigError::Validation(
                "SESSION_RENEW_WITHIN_MINUTES must be smaller than SESSION_TTL_MINUTES".to_string(),
            ));
        }

        // Validate defaults configuration
        if self.defaults.max_expiration_hours < 1 || self.defaults.max_expiration_hours > 8760 {
            return Err(ConfigError::Validation(
                "MAX_EXPIRATION_HOURS must be between 1 and 8760 (1 year)".to_string(),
            ));
        }
        if self.defaults.file_expiration_hours < 1
            || self.defaults.file_expiration_hours > self.defaults.max_expiration_hours
        {
            return Err(ConfigError::Validation(
                "DEFAULT_EXPIRATION_HOURS must be between 1 and MAX_EXPIRATION_HOURS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite:./data/kapsel.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            storage: StorageConfig {
                root: PathBuf::from("./data/storage"),
                max_file_size_bytes: 50 * 1024 * 1024, // 50MB
            },
            security: SecurityConfig {
                admin_username: "admin".to_string(),
                admin_password_hash: "".to_string(), // Must be provided by user
                unlock_token_secret: "".to_string(), // Must be provided by user
                cookie_secure: false,
            },
            session: SessionConfig {
                cookie_name: "session_token".to_string(),
                ttl_minutes: 30,
                renew_within_minutes: 0,
            },
            defaults: DefaultsConfig {
                file_expiration_hours: 168, // 7 days
                max_expiration_hours: 2160, // 90 days
                download_limit: 3,
            },
        }
    }
}
