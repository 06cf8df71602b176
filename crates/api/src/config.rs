//! Application configuration

use std::env;

use teamwallet_billing::config::{
    BillingConfig, DEFAULT_CURRENCY, DEFAULT_FALLBACK_PLAN_SLUG, DEFAULT_TX_TIMEOUT_MS,
};

/// Minimum length of the admin bearer token
const MIN_ADMIN_TOKEN_LEN: usize = 32;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    pub log_format: LogFormat,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Authentication
    pub admin_api_token: String,

    // Billing
    pub default_currency: String,
    pub fallback_plan_slug: String,
    pub billing_tx_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            log_format: LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            // Authentication
            admin_api_token: {
                let token = env::var("ADMIN_API_TOKEN")
                    .map_err(|_| ConfigError::Missing("ADMIN_API_TOKEN"))?;
                if token.len() < MIN_ADMIN_TOKEN_LEN {
                    return Err(ConfigError::WeakSecret(
                        "ADMIN_API_TOKEN must be at least 32 characters",
                    ));
                }
                token
            },

            // Billing
            default_currency: {
                let currency = env::var("DEFAULT_CURRENCY")
                    .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string())
                    .trim()
                    .to_ascii_uppercase();
                if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(ConfigError::Invalid(
                        "DEFAULT_CURRENCY must be a 3-letter ISO 4217 code",
                    ));
                }
                currency
            },
            fallback_plan_slug: env::var("FALLBACK_PLAN_SLUG")
                .unwrap_or_else(|_| DEFAULT_FALLBACK_PLAN_SLUG.to_string()),
            billing_tx_timeout_ms: {
                let timeout = env::var("BILLING_TX_TIMEOUT_MS")
                    .unwrap_or_else(|_| DEFAULT_TX_TIMEOUT_MS.to_string())
                    .parse()
                    .unwrap_or(DEFAULT_TX_TIMEOUT_MS);
                if timeout == 0 {
                    return Err(ConfigError::Invalid(
                        "BILLING_TX_TIMEOUT_MS must be greater than zero",
                    ));
                }
                timeout
            },
        })
    }

    /// Settings handed to the billing core
    pub fn billing_config(&self) -> BillingConfig {
        BillingConfig {
            default_currency: self.default_currency.clone(),
            fallback_plan_slug: self.fallback_plan_slug.clone(),
            transaction_timeout_ms: self.billing_tx_timeout_ms,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
