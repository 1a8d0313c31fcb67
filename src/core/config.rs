use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Hosted auth provider that issues the bearer tokens clients send us.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub gateway_url: String,
    pub secret_key: String,
    pub provider_name: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Pending slot overrides older than this are discarded.
    pub override_timeout: Duration,
    /// Occurrences created up front for a recurring booking, anchor excluded.
    pub recurring_instances: usize,
}

pub fn load() -> Result<Config> {
    Ok(Config {
        server: ServerConfig {
            port: try_load("PORT", "3000")?,
        },
        database: DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", "10")?,
        },
        auth: AuthConfig {
            url: try_load("AUTH_URL", "http://localhost:54321")?,
            api_key: required("AUTH_API_KEY")?,
        },
        payments: PaymentsConfig {
            gateway_url: try_load("PAYMENT_GATEWAY_URL", "https://api.onvopay.com")?,
            secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
            provider_name: try_load("PAYMENT_PROVIDER_NAME", "onvopay")?,
            max_retries: try_load("PAYMENT_MAX_RETRIES", "2")?,
            retry_backoff: Duration::from_millis(try_load("PAYMENT_RETRY_BACKOFF_MS", "1000")?),
            request_timeout: Duration::from_secs(try_load("PAYMENT_TIMEOUT_SECS", "30")?),
        },
        booking: BookingConfig {
            override_timeout: Duration::from_secs(try_load("SLOT_OVERRIDE_TIMEOUT_SECS", "10")?),
            recurring_instances: try_load("RECURRING_INSTANCES", "3")?,
        },
    })
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("Environment variable {key} must be set"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let port: u16 = try_load("BOOKING_TEST_UNSET_PORT", "3000").unwrap();
        assert_eq!(port, 3000);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = try_load::<u16>("BOOKING_TEST_UNSET_BAD", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("BOOKING_TEST_UNSET_BAD"));
    }
}
