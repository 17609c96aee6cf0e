use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub otp: OtpConfig,
    pub notifications: NotificationConfig,
    pub settings: SettingsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    // Keep-alive duration in seconds
    pub keep_alive_seconds: u64,
    // Client timeout for reading payload/body in seconds
    pub client_timeout_seconds: u64,
    // Client shutdown timeout in seconds
    pub client_shutdown_seconds: u64,
    pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: i32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub max_request_size_bytes: usize,
}

/// Issuance limits for one-time passwords
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    pub max_issues_per_window: u32,
    pub issue_window_seconds: u64,
    /// Wrong codes tolerated per identifier before the live code is discarded
    pub max_verify_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub sender_email: String,
    pub sender_sms_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

/// Configuration loading error naming the offending variable
#[derive(Debug)]
pub struct ConfigError {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

impl std::error::Error for ConfigError {}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError {
        key: key.to_string(),
        reason: "must be set".to_string(),
    })
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError {
            key: key.to_string(),
            reason: format!("'{}' is not a valid value", raw),
        }),
        Err(_) => Ok(default),
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError {
                key: "JWT_SECRET".to_string(),
                reason: "must be at least 32 characters".to_string(),
            });
        }

        Ok(Self {
            server: ServerConfig {
                host: string_or("HOST", "127.0.0.1"),
                port: parsed("PORT", 8080)?,
                workers: parsed("WORKERS", 4)?,
                max_connections: parsed("MAX_CONNECTIONS", 1000)?,
                keep_alive_seconds: parsed("KEEP_ALIVE_SECONDS", 75)?,
                client_timeout_seconds: parsed("CLIENT_TIMEOUT_SECONDS", 30)?,
                client_shutdown_seconds: parsed("CLIENT_SHUTDOWN_SECONDS", 5)?,
                maintenance_interval_seconds: parsed("MAINTENANCE_INTERVAL_SECONDS", 3600)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed("DB_MAX_CONNECTIONS", 10)?,
            },
            auth: AuthConfig {
                jwt_secret,
                jwt_expiration_hours: parsed("JWT_EXPIRATION_HOURS", 24)?,
                bcrypt_cost: parsed("BCRYPT_COST", 12)?,
                max_login_attempts: parsed("MAX_LOGIN_ATTEMPTS", 5)?,
                lockout_minutes: parsed("LOCKOUT_MINUTES", 15)?,
            },
            security: SecurityConfig {
                cors_allowed_origins: string_or(
                    "CORS_ALLOWED_ORIGINS",
                    "http://localhost:3000,http://127.0.0.1:3000",
                )
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                rate_limit_requests: parsed("RATE_LIMIT_REQUESTS", 100)?,
                rate_limit_window_seconds: parsed("RATE_LIMIT_WINDOW_SECONDS", 60)?,
                max_request_size_bytes: parsed("MAX_REQUEST_SIZE_BYTES", 262_144)?,
            },
            otp: OtpConfig {
                max_issues_per_window: parsed("OTP_MAX_ISSUES_PER_WINDOW", 3)?,
                issue_window_seconds: parsed("OTP_ISSUE_WINDOW_SECONDS", 900)?,
                max_verify_failures: parsed("OTP_MAX_VERIFY_FAILURES", 5)?,
            },
            notifications: NotificationConfig {
                sender_email: string_or("NOTIFY_SENDER_EMAIL", "no-reply@bloodbank.local"),
                sender_sms_id: string_or("NOTIFY_SENDER_SMS_ID", "BLDBNK"),
            },
            settings: SettingsConfig {
                cache_ttl_seconds: parsed("SETTINGS_CACHE_TTL_SECONDS", 300)?,
            },
            logging: LoggingConfig {
                level: string_or("LOG_LEVEL", "info"),
                directory: string_or("LOG_DIRECTORY", "logs"),
            },
        })
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            max_issues_per_window: 3,
            issue_window_seconds: 900,
            max_verify_failures: 5,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiration_hours: 24,
            bcrypt_cost: 12,
            max_login_attempts: 5,
            lockout_minutes: 15,
        }
    }
}
