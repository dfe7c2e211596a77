use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEV_JWT_SECRET: &str = "eventsphere-development-secret-change-me";

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "eventsphere_server=info,tower_http=info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set when RUST_ENV=production")]
    MissingInProduction(&'static str),
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Config: unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub production: bool,
    pub cors_allowed_origins: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` runs against the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_ttl: chrono::Duration,
    pub reset_token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    /// Return reset tokens in the forgot-password response (development only).
    pub expose_reset_tokens: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub currency: String,
    pub hold_ttl: chrono::Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// `None` logs outgoing mail instead of sending it.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from: String,
    pub app_url: String,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub enabled: bool,
    pub hold_sweep_interval: Duration,
    pub status_sweep_interval: Duration,
    pub reminder_interval: Duration,
    pub reminder_window: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub mail: MailConfig,
    pub jobs: JobsConfig,
}

impl Config {
    /// Reads the environment. Call after the tracing subscriber is installed
    /// so fallback warnings are not lost.
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = var_or("RUST_ENV", "development").to_lowercase() == "production";
        let jwt_secret = jwt_secret(production, env::var("JWT_SECRET").ok())?;

        Ok(Self {
            server: ServerConfig {
                bind_addr: parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3001))),
                production,
                cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            auth: AuthConfig {
                jwt_secret,
                session_ttl: chrono::Duration::days(parse_or("SESSION_TTL_DAYS", 7)),
                reset_token_ttl: chrono::Duration::minutes(parse_or("RESET_TOKEN_TTL_MINUTES", 60)),
                bcrypt_cost: parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST),
                expose_reset_tokens: !production && flag("EXPOSE_RESET_TOKENS"),
            },
            payment: PaymentConfig {
                base_url: var_or("PAYMENT_API_URL", "https://api.razorpay.com/v1"),
                key_id: var_or("PAYMENT_KEY_ID", ""),
                key_secret: var_or("PAYMENT_KEY_SECRET", ""),
                currency: var_or("PAYMENT_CURRENCY", "INR"),
                hold_ttl: chrono::Duration::minutes(parse_or("PAYMENT_HOLD_MINUTES", 15)),
                request_timeout: Duration::from_secs(parse_or("PAYMENT_TIMEOUT_SECS", 10)),
            },
            mail: MailConfig {
                smtp_host: env::var("SMTP_HOST").ok().filter(|h| !h.trim().is_empty()),
                smtp_port: parse_or("SMTP_PORT", 587),
                smtp_username: var_or("SMTP_USERNAME", ""),
                smtp_password: var_or("SMTP_PASSWORD", ""),
                from: var_or("MAIL_FROM", "EventSphere <no-reply@eventsphere.local>"),
                app_url: var_or("APP_URL", "http://localhost:5173"),
            },
            jobs: JobsConfig {
                enabled: !flag("DISABLE_JOBS"),
                hold_sweep_interval: Duration::from_secs(parse_or("HOLD_SWEEP_SECS", 60)),
                status_sweep_interval: Duration::from_secs(parse_or("STATUS_SWEEP_SECS", 3600)),
                reminder_interval: Duration::from_secs(parse_or("REMINDER_SWEEP_SECS", 3600)),
                reminder_window: chrono::Duration::hours(parse_or("REMINDER_WINDOW_HOURS", 24)),
            },
        })
    }
}

fn jwt_secret(production: bool, value: Option<String>) -> Result<String, ConfigError> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(secret) => Ok(secret),
        None if production => Err(ConfigError::MissingInProduction("JWT_SECRET")),
        None => {
            tracing::warn!("Config: JWT_SECRET not set, using the development secret");
            Ok(DEV_JWT_SECRET.to_string())
        }
    }
}

impl Default for Config {
    /// Development defaults with no environment lookups.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
                production: false,
                cors_allowed_origins: None,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            auth: AuthConfig {
                jwt_secret: DEV_JWT_SECRET.to_string(),
                session_ttl: chrono::Duration::days(7),
                reset_token_ttl: chrono::Duration::hours(1),
                bcrypt_cost: 4,
                expose_reset_tokens: true,
            },
            payment: PaymentConfig {
                base_url: "http://localhost:9999/v1".to_string(),
                key_id: "test_key".to_string(),
                key_secret: "test_secret".to_string(),
                currency: "INR".to_string(),
                hold_ttl: chrono::Duration::minutes(15),
                request_timeout: Duration::from_secs(5),
            },
            mail: MailConfig {
                smtp_host: None,
                smtp_port: 587,
                smtp_username: String::new(),
                smtp_password: String::new(),
                from: "EventSphere <no-reply@eventsphere.local>".to_string(),
                app_url: "http://localhost:5173".to_string(),
            },
            jobs: JobsConfig {
                enabled: false,
                hold_sweep_interval: Duration::from_secs(60),
                status_sweep_interval: Duration::from_secs(3600),
                reminder_interval: Duration::from_secs(3600),
                reminder_window: chrono::Duration::hours(24),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_and_reset_lifetimes() {
        let config = Config::default();
        assert_eq!(config.auth.session_ttl, chrono::Duration::days(7));
        assert_eq!(config.auth.reset_token_ttl, chrono::Duration::hours(1));
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        std::env::set_var("EVENTSPHERE_TEST_PORT", "not-a-number");
        assert_eq!(parse_or("EVENTSPHERE_TEST_PORT", 42u16), 42);
        std::env::remove_var("EVENTSPHERE_TEST_PORT");
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        assert!(matches!(
            jwt_secret(true, None),
            Err(ConfigError::MissingInProduction("JWT_SECRET"))
        ));
        assert!(jwt_secret(true, Some("  ".into())).is_err());
        assert_eq!(jwt_secret(true, Some("s3cret".into())).unwrap(), "s3cret");
    }

    #[test]
    fn test_development_falls_back_to_dev_secret() {
        assert_eq!(jwt_secret(false, None).unwrap(), DEV_JWT_SECRET);
    }
}
