use std::sync::Arc;
use std::time::Duration;

use nfe_core::AppError;
use nfe_core::clock::Clock;
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, Postgres};

use crate::config::DatabaseConfig;
use crate::layout::TableLayout;
use crate::repository::HistoryRepository;
use crate::retention::{RetentionPolicy, RetentionPruner};

/// Central database facade: owns the connection pool, hands out
/// connections with retry, and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    layout: Arc<TableLayout>,
    connect_attempts: u32,
    retry_base_delay: Duration,
    acquire_timeout: Duration,
}

impl Database {
    /// Build a pool without connecting; connections are opened by
    /// [`acquire`](Self::acquire).
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(config.connect_options()?);

        Ok(Self {
            pool,
            layout: Arc::new(config.layout.clone()),
            connect_attempts: config.connect_attempts,
            retry_base_delay: config.retry_base_delay,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool, layout: TableLayout) -> Self {
        let defaults = DatabaseConfig::default();
        let acquire_timeout = pool.options().get_acquire_timeout();
        Self {
            pool,
            layout: Arc::new(layout),
            connect_attempts: defaults.connect_attempts,
            retry_base_delay: defaults.retry_base_delay,
            acquire_timeout,
        }
    }

    /// Check out a connection, retrying transient failures with exponential
    /// backoff (`base`, `2 * base`, ...).
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, AppError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(e) => classify(e, self.acquire_timeout),
            };

            if attempt >= self.connect_attempts || !err.is_retryable() {
                tracing::error!(attempt, error = %err, "Giving up on database connection");
                return Err(AppError::ConnectionFailed {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
            tracing::warn!(
                attempt,
                max_attempts = self.connect_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Database connection failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Create the history table and its indexes if missing.
    pub async fn init_schema(&self) -> Result<(), AppError> {
        let mut conn = self.acquire().await?;
        for statement in self.layout.create_statements() {
            sqlx::query(&statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Schema creation failed: {e}")))?;
        }
        tracing::info!(table = self.layout.table(), "Database schema ready");
        Ok(())
    }

    /// Get a [`HistoryRepository`] backed by this pool.
    pub fn history_repo(&self, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> HistoryRepository {
        HistoryRepository::new(self.clone(), self.pruner(clock, policy))
    }

    /// Get a standalone [`RetentionPruner`].
    pub fn pruner(&self, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> RetentionPruner {
        RetentionPruner::new(self.clone(), clock, policy)
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Sort sqlx failures into the transient kinds `is_retryable` knows about.
fn classify(e: sqlx::Error, acquire_timeout: Duration) -> AppError {
    match e {
        sqlx::Error::PoolTimedOut => AppError::Timeout(acquire_timeout.as_secs()),
        sqlx::Error::Io(io) => AppError::NetworkError(io.to_string()),
        sqlx::Error::Tls(tls) => AppError::NetworkError(tls.to_string()),
        other => AppError::DatabaseError(other.to_string()),
    }
}
