use std::time::Duration;

use driftnet_core::AppError;

/// Connection pool settings for the Postgres-backed stores.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 30)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError("DATABASE_URL not set. Required for persistent stores.".into())
        })?;
        let mut config = Self::new(url);

        if let Ok(raw) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = parse_positive("DATABASE_MAX_CONNECTIONS", &raw)?;
        }
        if let Ok(raw) = std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            let secs = parse_positive("DATABASE_ACQUIRE_TIMEOUT_SECS", &raw)?;
            config.acquire_timeout = Duration::from_secs(u64::from(secs));
        }
        Ok(config)
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<u32, AppError> {
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {name} '{raw}': must be a positive integer"))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(parsed)
}
