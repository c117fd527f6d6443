use std::time::Duration;

use nfe_core::AppError;
use sqlx::postgres::PgConnectOptions;

use crate::layout::TableLayout;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    /// Attempts made by [`Database::acquire`](crate::Database::acquire).
    pub connect_attempts: u32,
    pub retry_base_delay: Duration,
    /// How long one pool checkout may wait for a connection.
    pub acquire_timeout: Duration,
    pub layout: TableLayout,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            database: "nfe".into(),
            max_connections: 5,
            connect_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            acquire_timeout: Duration::from_secs(10),
            layout: TableLayout::default(),
        }
    }
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (optional, overrides the `NFE_PG_*` keys)
    /// - `NFE_PG_HOST`, `NFE_PG_PORT`, `NFE_PG_USER`, `NFE_PG_PASSWORD`, `NFE_PG_DATABASE`
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `NFE_DB_CONNECT_ATTEMPTS` (optional, defaults to 3)
    /// - `NFE_TABLE_NAME` and `NFE_FIELD_*`, see [`TableLayout::from_lookup`]
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("NFE_PG_PORT") {
            None => defaults.port,
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AppError::ConfigError(format!("Invalid NFE_PG_PORT '{raw}': must be a port number"))
            })?,
        };

        Ok(Self {
            url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            host: lookup("NFE_PG_HOST").unwrap_or(defaults.host),
            port,
            user: lookup("NFE_PG_USER").unwrap_or(defaults.user),
            password: lookup("NFE_PG_PASSWORD").unwrap_or(defaults.password),
            database: lookup("NFE_PG_DATABASE").unwrap_or(defaults.database),
            max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            connect_attempts: positive(&lookup, "NFE_DB_CONNECT_ATTEMPTS")?
                .unwrap_or(defaults.connect_attempts),
            retry_base_delay: defaults.retry_base_delay,
            acquire_timeout: defaults.acquire_timeout,
            layout: TableLayout::from_lookup(&lookup)?,
        })
    }

    /// Connection options for sqlx.
    pub fn connect_options(&self) -> Result<PgConnectOptions, AppError> {
        match &self.url {
            Some(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| AppError::ConfigError(format!("Invalid DATABASE_URL: {e}"))),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.database)),
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u32>, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(Some(parsed))
}
